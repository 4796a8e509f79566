use core::error::Error;

#[derive(Debug, derive_more::Display)]
pub enum ActivationError {
    #[display("cannot prepare plugin socket {path}")]
    Socket { path: String },
    #[display("cannot bind plugin socket {path}")]
    Bind { path: String },
    #[display("activation server failed")]
    Serve,
}

impl Error for ActivationError {}
