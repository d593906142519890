pub mod nnls;

pub use nnls::{Nnls, NnlsError, NnlsSolution};
