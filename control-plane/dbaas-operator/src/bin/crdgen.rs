use dbaas_operator::crd::{BackupSchedule, DatabaseDeployment, DatabaseUser};
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let docs = [
        serde_yaml::to_string(&DatabaseDeployment::crd())?,
        serde_yaml::to_string(&DatabaseUser::crd())?,
        serde_yaml::to_string(&BackupSchedule::crd())?,
    ];
    println!("{}", docs.join("---\n"));
    Ok(())
}
