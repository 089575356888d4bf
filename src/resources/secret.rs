use super::child_meta;
use crate::{
    config::ControllerConfig,
    crds::{CTFd, ComponentResource, MariaDB, Minio},
    error::{Error, Result},
    utils::{admin_secret_name, mariadb_name, minio_name, random_string, redis_name},
};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub const ADMIN_NAME: &str = "name";
pub const ADMIN_EMAIL: &str = "email";
pub const ADMIN_PASSWORD: &str = "password";
pub const ADMIN_TOKEN: &str = "token";

pub const MARIADB_USER: &str = "MARIADB_USER";
pub const MARIADB_PASSWORD: &str = "MARIADB_PASSWORD";
pub const MARIADB_DATABASE: &str = "MARIADB_DATABASE";

pub const MINIO_ROOT_USER: &str = "MINIO_ROOT_USER";
pub const MINIO_ROOT_PASSWORD: &str = "MINIO_ROOT_PASSWORD";
/// Read by the bitnami/minio image only, other images ignore it.
pub const MINIO_DEFAULT_BUCKETS: &str = "MINIO_DEFAULT_BUCKETS";

/// Credentials of the CTFd admin account, kept in `<ctfd>-admin`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminCredentials {
    pub name: String,
    pub email: String,
    pub password: String,
    /// API token, stored once it has been created
    pub token: Option<String>,
}

impl AdminCredentials {
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        Ok(Self {
            name: required_value(secret, ADMIN_NAME)?,
            email: required_value(secret, ADMIN_EMAIL)?,
            password: required_value(secret, ADMIN_PASSWORD)?,
            token: secret_value(secret, ADMIN_TOKEN).filter(|t| !t.is_empty()),
        })
    }
}

/// Value of `key` in `data`, falling back to `stringData`.
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(|value| String::from_utf8(value.0.clone()).ok())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|data| data.get(key).cloned())
        })
}

/// Like [`secret_value`], but a missing or empty value is an error.
pub fn required_value(secret: &Secret, key: &str) -> Result<String> {
    secret_value(secret, key)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::MissingSecretKey {
            secret: secret.name_any(),
            key: key.to_string(),
        })
}

fn secret(meta: kube::api::ObjectMeta, data: &[(&str, String)]) -> Secret {
    Secret {
        metadata: meta,
        string_data: Some(
            data.iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

pub fn admin_secret(ctfd: &CTFd, config: &ControllerConfig) -> Result<Secret> {
    Ok(secret(
        child_meta(ctfd, admin_secret_name(&ctfd.name_any()), "ctfd")?,
        &[
            (ADMIN_NAME, config.admin_name.clone()),
            (ADMIN_EMAIL, config.admin_email.clone()),
            (ADMIN_PASSWORD, random_string(32)),
        ],
    ))
}

pub fn mariadb_secret(mariadb: &MariaDB) -> Result<Secret> {
    Ok(secret(
        child_meta(mariadb, mariadb.name_any(), MariaDB::APP)?,
        &[
            ("MARIADB_ROOT_PASSWORD", random_string(128)),
            // identifier length limits of MariaDB
            (MARIADB_USER, random_string(80)),
            (MARIADB_PASSWORD, random_string(128)),
            (MARIADB_DATABASE, random_string(64)),
            ("MARIADB_AUTO_UPGRADE", "yes".to_string()),
        ],
    ))
}

/// The bucket CTFd uploads to is named after the Minio resource and created
/// by the image on startup, which requires a bitnami/minio `minio_image`.
pub fn minio_secret(minio: &Minio) -> Result<Secret> {
    Ok(secret(
        child_meta(minio, minio.name_any(), Minio::APP)?,
        &[
            (MINIO_ROOT_USER, random_string(32)),
            (MINIO_ROOT_PASSWORD, random_string(128)),
            (MINIO_DEFAULT_BUCKETS, minio.name_any()),
        ],
    ))
}

/// Environment of the CTFd container. Connection details are read from the
/// already generated MariaDB and Minio secrets.
pub fn ctfd_secret(ctfd: &CTFd, mariadb: &Secret, minio: &Secret) -> Result<Secret> {
    let name = ctfd.name_any();
    let database_url = format!(
        "mysql+pymysql://{}:{}@{}/{}",
        required_value(mariadb, MARIADB_USER)?,
        required_value(mariadb, MARIADB_PASSWORD)?,
        mariadb_name(&name),
        required_value(mariadb, MARIADB_DATABASE)?,
    );

    Ok(secret(
        child_meta(ctfd, name.clone(), "ctfd")?,
        &[
            ("SECRET_KEY", random_string(128)),
            ("DATABASE_URL", database_url),
            ("REDIS_URL", format!("redis://{}:6379", redis_name(&name))),
            ("UPLOAD_PROVIDER", "s3".to_string()),
            ("AWS_ACCESS_KEY_ID", required_value(minio, MINIO_ROOT_USER)?),
            ("AWS_SECRET_ACCESS_KEY", required_value(minio, MINIO_ROOT_PASSWORD)?),
            ("AWS_S3_BUCKET", minio_name(&name)),
            ("AWS_S3_ENDPOINT_URL", format!("http://{}:9000", minio_name(&name))),
            ("AWS_S3_ADDRESSING_STYLE", "path".to_string()),
            ("UPDATE_CHECK", "False".to_string()),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::testing;
    use k8s_openapi::ByteString;
    use serde_json::json;

    fn stored(name: &str, data: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: kube::api::ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn admin_secret_is_generated() {
        let ctfd = testing::ctfd(json!({}));
        let secret = admin_secret(&ctfd, &ControllerConfig::default()).unwrap();

        assert_eq!(secret.metadata.name.as_deref(), Some("demo-admin"));
        let data = secret.string_data.unwrap();
        assert_eq!(data[ADMIN_NAME], "admin");
        assert_eq!(data[ADMIN_PASSWORD].len(), 32);
        assert!(!data.contains_key(ADMIN_TOKEN));
    }

    #[test]
    fn admin_credentials_read_from_data() {
        let secret = stored(
            "demo-admin",
            &[("name", "admin"), ("email", "a@b.c"), ("password", "pw"), ("token", "")],
        );
        let credentials = AdminCredentials::from_secret(&secret).unwrap();
        assert_eq!(credentials.password, "pw");
        assert_eq!(credentials.token, None);

        let secret = stored("demo-admin", &[("name", "admin"), ("email", "a@b.c")]);
        assert!(matches!(
            AdminCredentials::from_secret(&secret),
            Err(Error::MissingSecretKey { key, .. }) if key == "password"
        ));
    }

    #[test]
    fn ctfd_secret_points_at_components() {
        let ctfd = testing::ctfd(json!({}));
        let mariadb = stored(
            "demo-mariadb",
            &[("MARIADB_USER", "u"), ("MARIADB_PASSWORD", "p"), ("MARIADB_DATABASE", "db")],
        );
        let minio = stored(
            "demo-minio",
            &[("MINIO_ROOT_USER", "key"), ("MINIO_ROOT_PASSWORD", "secret")],
        );

        let secret = ctfd_secret(&ctfd, &mariadb, &minio).unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("demo"));
        let data = secret.string_data.unwrap();
        assert_eq!(data["DATABASE_URL"], "mysql+pymysql://u:p@demo-mariadb/db");
        assert_eq!(data["REDIS_URL"], "redis://demo-redis:6379");
        assert_eq!(data["AWS_ACCESS_KEY_ID"], "key");
        assert_eq!(data["AWS_S3_BUCKET"], "demo-minio");
        assert_eq!(data["AWS_S3_ENDPOINT_URL"], "http://demo-minio:9000");
        assert_eq!(data["SECRET_KEY"].len(), 128);
    }

    #[test]
    fn minio_creates_the_bucket_ctfd_uploads_to() {
        let ctfd = testing::ctfd(json!({}));
        let mut minio = crate::resources::components::minio(&ctfd).unwrap();
        minio.metadata.uid = Some("minio-uid".into());

        let minio_secret = minio_secret(&minio).unwrap();
        let minio_data = minio_secret.string_data.unwrap();

        let mariadb = stored(
            "demo-mariadb",
            &[("MARIADB_USER", "u"), ("MARIADB_PASSWORD", "p"), ("MARIADB_DATABASE", "db")],
        );
        let minio_stored = stored(
            "demo-minio",
            &[
                ("MINIO_ROOT_USER", minio_data[MINIO_ROOT_USER].as_str()),
                ("MINIO_ROOT_PASSWORD", minio_data[MINIO_ROOT_PASSWORD].as_str()),
            ],
        );
        let ctfd_data = ctfd_secret(&ctfd, &mariadb, &minio_stored)
            .unwrap()
            .string_data
            .unwrap();

        assert_eq!(minio_data[MINIO_DEFAULT_BUCKETS], ctfd_data["AWS_S3_BUCKET"]);
        assert_eq!(ctfd_data["AWS_ACCESS_KEY_ID"], minio_data[MINIO_ROOT_USER]);
    }

    #[test]
    fn ctfd_secret_needs_complete_component_secrets() {
        let ctfd = testing::ctfd(json!({}));
        let mariadb = stored("demo-mariadb", &[("MARIADB_USER", "u")]);
        let minio = stored("demo-minio", &[]);
        assert!(matches!(
            ctfd_secret(&ctfd, &mariadb, &minio),
            Err(Error::MissingSecretKey { secret, .. }) if secret == "demo-mariadb"
        ));
    }
}
