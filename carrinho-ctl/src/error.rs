use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    CarError(#[from] carrinho::Error),

    #[error("not connected to the car")]
    NotConnected,

    #[error("RecvError")]
    RecvError,

    #[error("SendError")]
    SendError,

    #[error("{0}")]
    Other(std::borrow::Cow<'static, str>),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self::Other(s.into())
    }
}
impl From<&'static str> for Error {
    fn from(s: &'static str) -> Self {
        Self::Other(s.into())
    }
}
