use super::{apply::ApplyResource, component::update_ready, Context, Reconciler, SubReconciler};
use crate::{
    config::ControllerConfig,
    crds::{CTFd, ChallengeDescription, ComponentResource, MariaDB, Minio, Redis},
    ctfd::{CreateTokenRequest, CtfdClient, SetupRequest},
    date_time::DateOnly,
    diff::{self, UpdatePolicy},
    error::{Error, Result},
    readiness,
    resources::{
        components, deployment,
        secret::{self, AdminCredentials, ADMIN_TOKEN},
        service, service_account,
    },
    sync::{ChallengeSynchronizer, Ledger, StatusLedgerStore},
    utils::{admin_secret_name, mariadb_name, minio_name, redis_name},
};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::{
    api::{apps::v1::Deployment, core::v1::Secret},
    ByteString,
};
use kube::{
    api::{ListParams, Patch, PatchParams},
    runtime::controller::Action,
    Api, ResourceExt,
};
use tracing::{debug, info};

/// Lifetime of the API token the operator creates for itself
const TOKEN_VALIDITY_MONTHS: u32 = 6;

fn namespace(ctfd: &CTFd) -> Result<String> {
    ctfd.namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))
}

async fn admin_credentials(ctfd: &CTFd, ctx: &Context) -> Result<AdminCredentials> {
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace(ctfd)?);
    let secret = secrets.get(&admin_secret_name(&ctfd.name_any())).await?;
    AdminCredentials::from_secret(&secret)
}

async fn base_url(ctfd: &CTFd, ctx: &Context) -> Result<String> {
    let endpoint = ctx
        .endpoints
        .endpoint(&service::ctfd_target(ctfd), &ctx.shutdown)
        .await?;
    Ok(format!("http://{}", endpoint))
}

/// Environment of the CTFd container. Needs the generated MariaDB and Minio
/// credentials, so it waits until both exist.
pub struct CtfdSecretReconciler;

#[async_trait]
impl SubReconciler<CTFd> for CtfdSecretReconciler {
    fn name(&self) -> &'static str {
        "secret"
    }

    async fn reconcile(&self, ctfd: &CTFd, ctx: &Context) -> Result<Option<Action>> {
        let name = ctfd.name_any();
        let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace(ctfd)?);
        if secrets.get_opt(&name).await?.is_some() {
            return Ok(None);
        }

        let mariadb = secrets.get_opt(&mariadb_name(&name)).await?;
        let minio = secrets.get_opt(&minio_name(&name)).await?;
        let (Some(mariadb), Some(minio)) = (mariadb, minio) else {
            info!("Waiting for the MariaDB and Minio secrets");
            return Ok(Some(Action::requeue(ctx.config.dependency_requeue())));
        };

        let desired = secret::ctfd_secret(ctfd, &mariadb, &minio)?;
        diff::apply(&secrets, desired, UpdatePolicy::CreateOnly).await?;
        info!("Created CTFd secret");
        Ok(None)
    }
}

/// Ready once Redis, MariaDB and Minio are ready and the deployment is rolled out.
pub struct CtfdStatusReconciler;

#[async_trait]
impl SubReconciler<CTFd> for CtfdStatusReconciler {
    fn name(&self) -> &'static str {
        "status"
    }

    async fn reconcile(&self, ctfd: &CTFd, ctx: &Context) -> Result<Option<Action>> {
        let name = ctfd.name_any();
        let namespace = namespace(ctfd)?;
        let client = ctx.client.clone();

        let redis = Api::<Redis>::namespaced(client.clone(), &namespace)
            .get_opt(&redis_name(&name))
            .await?;
        let mariadb = Api::<MariaDB>::namespaced(client.clone(), &namespace)
            .get_opt(&mariadb_name(&name))
            .await?;
        let minio = Api::<Minio>::namespaced(client.clone(), &namespace)
            .get_opt(&minio_name(&name))
            .await?;
        let deployment = Api::<Deployment>::namespaced(client.clone(), &namespace)
            .get_opt(&name)
            .await?;

        let ready = readiness::aggregate(
            &[
                redis.is_some_and(|r| r.ready()),
                mariadb.is_some_and(|m| m.ready()),
                minio.is_some_and(|m| m.ready()),
            ],
            deployment.as_ref(),
        );

        let api: Api<CTFd> = Api::namespaced(client, &namespace);
        update_ready(&api, &name, ctfd.ready(), ready).await?;
        Ok(None)
    }
}

/// Completes the first-run wizard of a fresh CTFd.
pub struct SetupReconciler;

#[async_trait]
impl SubReconciler<CTFd> for SetupReconciler {
    fn name(&self) -> &'static str {
        "setup"
    }

    async fn reconcile(&self, ctfd: &CTFd, ctx: &Context) -> Result<Option<Action>> {
        if !ctfd.ready() {
            return Ok(None);
        }

        let client = CtfdClient::new(&base_url(ctfd, ctx).await?, None, ctx.config.http_timeout())?;
        if !client.setup_required().await? {
            return Ok(None);
        }

        info!("Running CTFd setup");
        let admin = admin_credentials(ctfd, ctx).await?;
        client.setup(&SetupRequest::new(&ctfd.spec, &admin)).await?;

        if client.setup_required().await? {
            return Err(Error::SetupVerificationError(format!(
                "{} still requires setup after submitting the form",
                ctfd.name_any()
            )));
        }
        info!("CTFd setup complete");
        Ok(None)
    }
}

/// Creates the API token used for challenge synchronization and stores it in
/// the admin secret.
pub struct AccessTokenReconciler;

#[async_trait]
impl SubReconciler<CTFd> for AccessTokenReconciler {
    fn name(&self) -> &'static str {
        "access token"
    }

    async fn reconcile(&self, ctfd: &CTFd, ctx: &Context) -> Result<Option<Action>> {
        if !ctfd.ready() {
            return Ok(None);
        }
        let admin = admin_credentials(ctfd, ctx).await?;
        if admin.token.is_some() {
            return Ok(None);
        }

        let client = CtfdClient::new(&base_url(ctfd, ctx).await?, None, ctx.config.http_timeout())?;
        client.login(&admin.name, &admin.password).await?;
        let token = client
            .create_token(&CreateTokenRequest {
                description: format!("{} (ctf-ui-operator)", ctfd.name_any()),
                expiration: DateOnly::months_after(Utc::now(), TOKEN_VALIDITY_MONTHS),
            })
            .await?;

        let patch = serde_json::json!({
            "data": { ADMIN_TOKEN: ByteString(token.value.into_bytes()) }
        });
        let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace(ctfd)?);
        secrets
            .patch(
                &admin_secret_name(&ctfd.name_any()),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        info!(token_id = token.id, "Stored CTFd access token");
        Ok(None)
    }
}

/// Mirrors the ChallengeDescriptions of the challenge namespace into CTFd.
pub struct ChallengeSyncReconciler;

#[async_trait]
impl SubReconciler<CTFd> for ChallengeSyncReconciler {
    fn name(&self) -> &'static str {
        "challenges"
    }

    async fn reconcile(&self, ctfd: &CTFd, ctx: &Context) -> Result<Option<Action>> {
        let Some(challenge_namespace) = ctfd.challenge_namespace() else {
            return Ok(None);
        };
        if !ctfd.ready() {
            return Ok(None);
        }
        let Some(token) = admin_credentials(ctfd, ctx).await?.token else {
            debug!("No access token yet, skipping challenge synchronization");
            return Ok(None);
        };

        let descriptions: Api<ChallengeDescription> =
            Api::namespaced(ctx.client.clone(), challenge_namespace);
        let local = descriptions.list(&ListParams::default()).await?.items;

        // the cached object may not carry our own latest ledger writes yet
        let ctfds: Api<CTFd> = Api::namespaced(ctx.client.clone(), &namespace(ctfd)?);
        let current = ctfds.get(&ctfd.name_any()).await?;

        let platform = CtfdClient::new(
            &base_url(ctfd, ctx).await?,
            Some(token),
            ctx.config.http_timeout(),
        )?;
        let store = StatusLedgerStore::new(ctx.client.clone(), ctfd)?;

        let (ledger, report) = ChallengeSynchronizer::new(&platform, &store)
            .sync(&local, Ledger::new(current.ledger()))
            .await?;

        ctx.metrics.record_remote_mutations(report.mutations());
        if report.mutations() > 0 {
            info!(?report, challenges = ledger.len(), "Synchronized challenges");
        }
        Ok(None)
    }
}

pub fn ctfd_reconciler() -> Reconciler<CTFd> {
    Reconciler::builder()
        .with(ApplyResource::new(
            "admin secret",
            UpdatePolicy::CreateOnly,
            secret::admin_secret,
        ))
        .with(ApplyResource::new(
            "redis",
            components::UPDATE_POLICY,
            |ctfd: &CTFd, _: &ControllerConfig| components::redis(ctfd),
        ))
        .with(ApplyResource::new(
            "mariadb",
            components::UPDATE_POLICY,
            |ctfd: &CTFd, _: &ControllerConfig| components::mariadb(ctfd),
        ))
        .with(ApplyResource::new(
            "minio",
            components::UPDATE_POLICY,
            |ctfd: &CTFd, _: &ControllerConfig| components::minio(ctfd),
        ))
        .with(CtfdSecretReconciler)
        .with(ApplyResource::new(
            "service account",
            service_account::UPDATE_POLICY,
            |ctfd: &CTFd, _: &ControllerConfig| service_account::service_account(ctfd, "ctfd"),
        ))
        .with(ApplyResource::new(
            "deployment",
            deployment::UPDATE_POLICY,
            deployment::ctfd_deployment,
        ))
        .with(ApplyResource::new(
            "service",
            service::UPDATE_POLICY,
            |ctfd: &CTFd, _: &ControllerConfig| service::ctfd_service(ctfd),
        ))
        .with(CtfdStatusReconciler)
        .with(SetupReconciler)
        .with(AccessTokenReconciler)
        .with(ChallengeSyncReconciler)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::testing;
    use serde_json::json;

    #[test]
    fn ctfd_steps_are_ordered() {
        assert_eq!(
            ctfd_reconciler().steps(),
            vec![
                "admin secret",
                "redis",
                "mariadb",
                "minio",
                "secret",
                "service account",
                "deployment",
                "service",
                "status",
                "setup",
                "access token",
                "challenges",
            ]
        );
    }

    #[tokio::test]
    async fn remote_steps_wait_for_readiness() {
        // the test context cannot reach an API server, so any lookup would fail
        let ctfd = testing::ctfd(json!({ "challengeNamespace": "" }));
        let ctx = Context::for_testing();

        assert_eq!(SetupReconciler.reconcile(&ctfd, &ctx).await.unwrap(), None);
        assert_eq!(AccessTokenReconciler.reconcile(&ctfd, &ctx).await.unwrap(), None);
        assert_eq!(ChallengeSyncReconciler.reconcile(&ctfd, &ctx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn challenge_sync_is_opt_in() {
        let mut ctfd = testing::ctfd(json!({}));
        ctfd.status = Some(crate::crds::CTFdStatus {
            ready: true,
            ..Default::default()
        });
        let ctx = Context::for_testing();

        assert_eq!(ChallengeSyncReconciler.reconcile(&ctfd, &ctx).await.unwrap(), None);
    }
}
