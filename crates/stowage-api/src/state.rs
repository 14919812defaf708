use stowage_core::Config;
use stowage_services::UploadCore;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub core: UploadCore,
    pub config: Config,
}
