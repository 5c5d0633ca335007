//! Provider construction by name (SPEC_FULL.md §6).
//!
//! The one place that knows the full set of registered provider names;
//! everything upstream (the CLI, tests) talks to `dyn CloudProvider` after
//! this point.

use std::sync::Arc;

use cloudhub_core::domain::CoreError;
use cloudhub_core::ports::cloud_provider::CloudProvider;

use crate::common::InitData;

/// Builds the provider named `name`, consuming `init`.
///
/// # Errors
/// [`CoreError::unimplemented`] for an unrecognized name.
pub fn create_provider(name: &str, init: InitData) -> Result<Arc<dyn CloudProvider>, CoreError> {
    match name {
        "google" => Ok(Arc::new(crate::google::GoogleDriveProvider::new(init)?)),
        "onedrive" => Ok(Arc::new(crate::onedrive::OneDriveProvider::new(init)?)),
        "dropbox" => Ok(Arc::new(crate::dropbox::DropboxProvider::new(init)?)),
        "box" => Ok(Arc::new(crate::box_provider::BoxProvider::new(init)?)),
        "amazons3" => Ok(Arc::new(crate::s3::S3Provider::new(init)?)),
        "hubic" => Ok(Arc::new(crate::hubic::HubicProvider::new(init)?)),
        "mega" => Ok(Arc::new(crate::mega::MegaProvider::new(init)?)),
        "webdav" => Ok(Arc::new(crate::webdav::WebdavProvider::new(init)?)),
        "yandex" => Ok(Arc::new(crate::yandex::YandexDiskProvider::new(init)?)),
        "pcloud" => Ok(Arc::new(crate::pcloud::PCloudProvider::new(init)?)),
        "gphotos" => Ok(Arc::new(crate::gphotos::GooglePhotosProvider::new(init)?)),
        "4shared" => Ok(Arc::new(crate::shared4::FourSharedProvider::new(init)?)),
        "local" | "localwinrt" => {
            let root = init
                .hints
                .get("root")
                .cloned()
                .ok_or_else(|| CoreError::auth(format!("{name}: missing required \"root\" hint")))?;
            let permission = init.permission;
            let token = init.token.clone();
            let thread_pool = init.thread_pool.clone();
            let hints = init.hints.clone();
            let static_name: &'static str = match name {
                "local" => "local",
                _ => "localwinrt",
            };
            Ok(Arc::new(crate::local::LocalProvider::new(
                static_name,
                std::path::PathBuf::from(root),
                hints,
                permission,
                token,
                thread_pool,
            )?))
        }
        other => Err(CoreError::unimplemented(format!("unknown provider: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudhub_core::domain::{Permission, Token};
    use cloudhub_http::testing::MockHttpEngine;
    use cloudhub_runtime::ThreadPool;
    use std::collections::HashMap;

    fn init(hints: HashMap<String, String>) -> InitData {
        InitData {
            token: Token::non_oauth("t"),
            hints,
            permission: Permission::ReadWrite,
            callback: None,
            http: Arc::new(MockHttpEngine::new(Vec::new())),
            thread_pool: Arc::new(ThreadPool::new(1)),
        }
    }

    #[test]
    fn unknown_provider_name_is_unimplemented() {
        let err = create_provider("not-a-provider", init(HashMap::new()))
            .err()
            .expect("expected an error");
        assert!(err.is_kind(cloudhub_core::domain::ErrorKind::Unimplemented));
    }

    #[test]
    fn local_without_root_hint_fails_fast() {
        let err = create_provider("local", init(HashMap::new()))
            .err()
            .expect("expected an error");
        assert!(err.is_kind(cloudhub_core::domain::ErrorKind::Auth));
    }

    #[test]
    fn local_with_root_hint_constructs() {
        let mut hints = HashMap::new();
        hints.insert("root".to_string(), "/tmp".to_string());
        let provider = create_provider("local", init(hints)).unwrap();
        assert_eq!(provider.name(), "local");
    }
}
