use clap::ValueEnum;
use comfy_table::{Cell, Table};
use kfjob_kubeflow::replica::ReplicaSpec;
use kfjob_kubeflow::TrainingJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Yaml,
    Json,
}

pub fn render(job: &TrainingJob, format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Table => format!(
            "{} {} in namespace {}\n{}",
            job.framework(),
            job.name(),
            job.namespace(),
            role_table(job)
        ),
        OutputFormat::Yaml => job.to_yaml()?,
        OutputFormat::Json => colored_json::to_colored_json_auto(&job.to_json()?)?,
    })
}

pub fn role_table(job: &TrainingJob) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Role", "Replicas", "Image", "GPU", "Node Selector", "Mount"]);

    for (role, spec) in job.replica_specs() {
        let row = RoleRow::from_spec(spec);
        table.add_row(vec![
            Cell::new(role),
            Cell::new(spec.replicas.map_or("-".to_string(), |n| n.to_string())),
            Cell::new(row.image),
            Cell::new(row.gpu),
            Cell::new(row.node_selector),
            Cell::new(row.mount),
        ]);
    }
    table
}

struct RoleRow {
    image: String,
    gpu: String,
    node_selector: String,
    mount: String,
}

impl RoleRow {
    fn from_spec(spec: &ReplicaSpec) -> RoleRow {
        let pod = spec.template.spec.as_ref();
        let container = pod.and_then(|p| p.containers.first());

        let image = container
            .and_then(|c| c.image.clone())
            .unwrap_or_else(|| "-".to_string());
        let gpu = container
            .and_then(|c| c.resources.as_ref())
            .and_then(|r| r.limits.as_ref())
            .map(|limits| {
                limits
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v.0))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_else(|| "-".to_string());
        let node_selector = pod
            .and_then(|p| p.node_selector.as_ref())
            .map(|sel| {
                sel.iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .unwrap_or_else(|| "-".to_string());
        let mount = container
            .and_then(|c| c.volume_mounts.as_ref())
            .and_then(|m| m.first())
            .map(|m| m.mount_path.clone())
            .unwrap_or_else(|| "-".to_string());

        RoleRow {
            image,
            gpu,
            node_selector,
            mount,
        }
    }
}
