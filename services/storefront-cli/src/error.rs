//! Command-line errors
//!
//! API failures are `api_client::NormalizedError` and pass straight through
//! to `main`; argument mistakes are reported by clap. These cover what goes
//! wrong in between.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("STOREFRONT_PASSWORD must be set to sign in")]
    MissingPassword,
}
