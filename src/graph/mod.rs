mod directed;
pub use directed::*;

mod undirected;
pub use undirected::*;
