//! Prints the ClickHouseInstallation CRD as YAML.
//!
//! Usage: cargo run --bin crdgen | kubectl apply -f -
use chop_operator::crd::chi::ClickHouseInstallation;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = ClickHouseInstallation::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
