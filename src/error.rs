//! Error type for the compile pipeline.

use derive_more::{Display, Error, From};
use kiln_passes::PassError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Eq, Display, Error, From)]
pub enum Error {
    #[display("{_0}")]
    Pass(#[error(source)] PassError),
}
