use crate::core::config::AppConfig;
use crate::core::utils::DbPool;
use aws_sdk_s3::Client as S3Client;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    /// Object storage client for quotation PDFs. Absent when no drive is
    /// configured; PDF endpoints then skip persistence and return bytes only.
    pub drive: Option<S3Client>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("conn", &"DbPool")
            .field("config", &self.config)
            .field("drive", &self.drive.is_some())
            .finish()
    }
}
