use thiserror::Error;

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("upstream fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("key cache error: {0}")]
    KeyCache(#[from] KeyCacheError),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport failure after {attempts} attempt(s): {last}")]
    Exhausted { attempts: usize, last: String },
    #[error("malformed upstream payload: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum KeyCacheError {
    #[error("cache file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
