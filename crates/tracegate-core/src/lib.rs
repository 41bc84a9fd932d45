pub mod compare;
pub mod conformance;
pub mod engine;
pub mod environment;
pub mod errors;
pub mod evidence;
pub mod fingerprint;
pub mod gate;
pub mod judge;
pub mod model;
pub mod registry;
pub mod replay;
pub mod schema;
