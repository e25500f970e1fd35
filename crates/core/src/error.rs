use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("initial fetch failed: {0}")]
    Fetch(String),

    #[error("change feed error: {0}")]
    Feed(String),

    #[error("candidate write for school {school_id} failed: {reason}")]
    Write { school_id: String, reason: String },

    #[error("school {0} not found")]
    SchoolNotFound(String),

    #[error("no school selected")]
    NoSchoolSelected,

    #[error("unknown class key {0:?}")]
    UnknownClass(String),
}

impl SyncError {
    /// Text shown to the user. The UI is Turkish only.
    pub fn user_message(&self) -> &'static str {
        match self {
            SyncError::Fetch(_) => {
                "Veri yüklenirken bir hata oluştu. Lütfen daha sonra tekrar deneyin."
            }
            SyncError::Feed(_) => "Veri güncellenirken bir hata oluştu. Lütfen sayfayı yenileyin.",
            SyncError::Write { .. } => {
                "Aday sayısı güncellenirken bir hata oluştu. Lütfen tekrar deneyin."
            }
            SyncError::SchoolNotFound(_) => "Geçersiz sürücü kursu seçimi",
            SyncError::NoSchoolSelected => "Lütfen bir sürücü kursu seçin",
            SyncError::UnknownClass(_) => "Geçersiz sınıf türü",
        }
    }

    /// Only a failed initial load blocks the UI; everything else is a dismissible notice.
    pub fn is_blocking(&self) -> bool {
        matches!(self, SyncError::Fetch(_))
    }
}
