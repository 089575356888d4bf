use ctf_ui_operator::crds::{CTFd, MariaDB, Minio, Redis};
use kube::CustomResourceExt;

/// ChallengeDescription is left out, it belongs to the challenge operator.
fn main() -> anyhow::Result<()> {
    let crds = [
        CTFd::crd(),
        Redis::crd(),
        MariaDB::crd(),
        Minio::crd(),
    ];
    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
