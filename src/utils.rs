/// Utility functions for the ctf-ui-operator
use rand::{distributions::Alphanumeric, Rng};

/// Generate a random string from `[a-zA-Z0-9]`
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn redis_name(ctfd_name: &str) -> String {
    format!("{}-redis", ctfd_name)
}

pub fn mariadb_name(ctfd_name: &str) -> String {
    format!("{}-mariadb", ctfd_name)
}

pub fn minio_name(ctfd_name: &str) -> String {
    format!("{}-minio", ctfd_name)
}

pub fn admin_secret_name(ctfd_name: &str) -> String {
    format!("{}-admin", ctfd_name)
}
