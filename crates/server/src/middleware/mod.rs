pub mod identity;
pub mod model_loaders;

pub use identity::*;
pub use model_loaders::*;
