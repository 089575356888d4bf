use super::child_meta;
use crate::{
    crds::{CTFd, ComponentResource, MariaDB, Minio, Redis},
    diff::UpdatePolicy,
    error::Result,
    utils::{mariadb_name, minio_name, redis_name},
};
use kube::ResourceExt;

pub const UPDATE_POLICY: UpdatePolicy = UpdatePolicy::Fields(&["spec"]);

pub fn redis(ctfd: &CTFd) -> Result<Redis> {
    Ok(Redis {
        metadata: child_meta(ctfd, redis_name(&ctfd.name_any()), Redis::APP)?,
        spec: ctfd.spec.redis.clone(),
        status: None,
    })
}

pub fn mariadb(ctfd: &CTFd) -> Result<MariaDB> {
    Ok(MariaDB {
        metadata: child_meta(ctfd, mariadb_name(&ctfd.name_any()), MariaDB::APP)?,
        spec: ctfd.spec.maria_db.clone(),
        status: None,
    })
}

pub fn minio(ctfd: &CTFd) -> Result<Minio> {
    Ok(Minio {
        metadata: child_meta(ctfd, minio_name(&ctfd.name_any()), Minio::APP)?,
        spec: ctfd.spec.minio.clone(),
        status: None,
    })
}
