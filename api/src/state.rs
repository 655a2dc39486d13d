use std::sync::Arc;

use crate::config::Config;
use crate::identity::IdentityProvider;
use crate::mail::MailSender;
use crate::store::DocumentStore;

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub mail: Arc<dyn MailSender>,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Whether outbound mail can actually be delivered.
    pub fn mail_configured(&self) -> bool {
        self.mail.delivers()
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::identity::StoreIdentityProvider;
    use crate::mail::testing::RecordingMailSender;
    use crate::store::MemoryStore;

    /// In-memory state plus handles to inspect what the handlers did.
    pub struct TestApp {
        pub state: AppState,
        pub store: MemoryStore,
        pub mail: RecordingMailSender,
    }

    pub fn test_app() -> TestApp {
        let store = MemoryStore::new();
        let mail = RecordingMailSender::default();
        let config = Config::for_tests();
        let store_handle: Arc<dyn DocumentStore> = Arc::new(store.clone());
        let identity = StoreIdentityProvider::new(
            store_handle.clone(),
            config.retry,
            config.app_base_url.clone(),
        );
        TestApp {
            state: AppState {
                store: store_handle,
                mail: Arc::new(mail.clone()),
                identity: Arc::new(identity),
                config: Arc::new(config),
            },
            store,
            mail,
        }
    }
}
