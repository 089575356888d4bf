pub mod challenge_description;
pub mod component;
pub mod ctfd;
pub mod mariadb;
pub mod minio;
pub mod redis;

// Re-export types
pub use challenge_description::{ChallengeDescription, ChallengeDescriptionSpec, ChallengeHint};
pub use component::{
    ComponentResource, PersistentVolumeClaimSpec, ResourceRequirementsSpec, ResourceSpec,
};
pub use ctfd::{
    AccountVisibility, CTFd, CTFdSpec, CTFdStatus, ChallengeLedgerEntry, ChallengeVisibility,
    HintLedgerEntry, RegistrationVisibility, ScoreVisibility, Theme, UserMode,
};
pub use mariadb::{MariaDB, MariaDBSpec, MariaDBStatus};
pub use minio::{Minio, MinioSpec, MinioStatus};
pub use redis::{Redis, RedisSpec, RedisStatus};
