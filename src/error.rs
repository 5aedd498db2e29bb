#[derive(Debug, thiserror::Error)]
pub enum WalldexError {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("task error: {0}")]
    Task(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("id mismatch: requested {requested}, store returned {returned}")]
    IdMismatch { requested: i64, returned: i64 },

    #[error("person not found: {0}")]
    PersonNotFound(i64),

    #[error("wallpaper not found: {0}")]
    WallpaperNotFound(i64),
}

pub type Result<T> = std::result::Result<T, WalldexError>;
