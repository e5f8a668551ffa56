pub mod context;
pub mod doc;
pub mod error;
pub mod expand;
pub mod exprbool;
pub mod fileset;
pub mod ids;
pub mod pattern;
pub mod script;
pub mod types;

pub use context::EngineContext;
pub use error::EngineError;
pub use ids::Id;
pub use types::{
    Benchmark, DuplicateMode, Parameter, ParameterMode, ParameterPoint, Parameterset, Step,
    UpdateMode, Workpackage, WorkpackageState,
};
