//! The `clusterlink-ctl` command surface.
//!
//! Every command maps onto exactly one mutation of a resource in the cluster named by the
//! client arguments. Resources are written as-is; validation happens when the controller
//! indexes them.

use crate::{
    core::LbScheme,
    k8s::{
        self,
        labels::Selector,
        multicluster::{
            AccessRule, Endpoint, ExportSpec, ImportSource, ImportSpec, PeerSpec, PolicyAction,
            WorkloadSetOrSelector,
        },
        Api, DeleteParams, ListParams, PostParams, ResourceExt,
    },
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use k8s_openapi::NamespaceResourceScope;
use std::{collections::BTreeMap, str::FromStr};

#[derive(Debug, Parser)]
#[clap(name = "clusterlink-ctl", about = "Manages ClusterLink resources")]
pub struct Ctl {
    #[clap(long, default_value = "warn", env = "CLUSTERLINK_CTL_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    /// Namespace of namespaced resources.
    #[clap(long, short = 'n', default_value = "default")]
    namespace: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Creates a resource.
    #[clap(subcommand)]
    Create(Create),

    /// Prints resources as YAML.
    Get {
        #[clap(value_enum)]
        kind: GetKind,
        name: Option<String>,
        /// Selects privileged access policies.
        #[clap(long)]
        privileged: bool,
    },

    /// Deletes a resource.
    Delete {
        #[clap(value_enum)]
        kind: DeleteKind,
        name: String,
        /// Selects privileged access policies.
        #[clap(long)]
        privileged: bool,
    },

    /// Exports a local service under its own name.
    Expose {
        #[clap(long)]
        service: String,
        #[clap(long)]
        port: u16,
    },
}

#[derive(Debug, Subcommand)]
enum Create {
    Peer {
        #[clap(long)]
        name: String,
        #[clap(long)]
        host: String,
        #[clap(long)]
        port: u16,
    },

    Export {
        #[clap(long)]
        name: String,
        /// Defaults to the export's name.
        #[clap(long)]
        host: Option<String>,
        #[clap(long)]
        port: u16,
    },

    Import {
        #[clap(long)]
        name: String,
        #[clap(long)]
        port: u16,
        /// A peer to source the import from. May be repeated; order is preserved.
        #[clap(long = "peer")]
        peers: Vec<String>,
        /// Defaults to the import's name.
        #[clap(long)]
        export_name: Option<String>,
        #[clap(long)]
        export_namespace: Option<String>,
        #[clap(long)]
        lb_scheme: Option<String>,
    },

    /// Adds a source to an existing import.
    Binding {
        #[clap(long)]
        import: String,
        #[clap(long)]
        peer: String,
        /// Defaults to the import's name.
        #[clap(long)]
        export_name: Option<String>,
    },

    Policy(CreatePolicy),
}

#[derive(Debug, clap::Args)]
struct CreatePolicy {
    #[clap(long = "type", value_enum)]
    policy_type: PolicyType,

    #[clap(long)]
    name: Option<String>,

    #[clap(long, value_enum)]
    action: Option<ActionArg>,

    #[clap(long)]
    privileged: bool,

    /// A `key=value` attribute the source must carry. May be repeated.
    #[clap(long)]
    from: Vec<Label>,

    /// A `key=value` attribute the destination must carry. May be repeated.
    #[clap(long)]
    to: Vec<Label>,

    #[clap(long)]
    import: Option<String>,

    #[clap(long)]
    scheme: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum PolicyType {
    Access,
    Lb,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ActionArg {
    Allow,
    Deny,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum GetKind {
    Peer,
    Export,
    Import,
    Policy,
    Binding,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum DeleteKind {
    Peer,
    Export,
    Import,
    Policy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Label(String, String);

/// A client bound to the namespace that commands operate in.
pub struct Cluster {
    client: k8s::Client,
    namespace: String,
}

// === impl Ctl ===

impl Ctl {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            namespace,
            command,
        } = self;

        log_format.try_init(log_level)?;
        let client = client.try_client().await?;
        Cluster::new(client, namespace).execute(command).await
    }
}

// === impl Cluster ===

impl Cluster {
    pub fn new(client: k8s::Client, namespace: String) -> Self {
        Self { client, namespace }
    }

    fn api<T>(&self) -> Api<T>
    where
        T: k8s::Resource<Scope = NamespaceResourceScope>,
        <T as k8s::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn peers(&self) -> Api<k8s::Peer> {
        Api::all(self.client.clone())
    }

    async fn execute(&self, command: Command) -> Result<()> {
        let params = PostParams::default();
        match command {
            Command::Create(Create::Peer { name, host, port }) => {
                self.peers()
                    .create(&params, &mk_peer(&name, host, port))
                    .await?;
                println!("peer/{name} created");
            }

            Command::Create(Create::Export { name, host, port }) => {
                self.api::<k8s::Export>()
                    .create(&params, &mk_export(&name, host, port))
                    .await?;
                println!("export/{name} created");
            }

            Command::Expose { service, port } => {
                let export = mk_export(&service, Some(service.clone()), port);
                self.api::<k8s::Export>().create(&params, &export).await?;
                println!("export/{service} created");
            }

            Command::Create(Create::Import {
                name,
                port,
                peers,
                export_name,
                export_namespace,
                lb_scheme,
            }) => {
                let import = mk_import(
                    &name,
                    port,
                    &peers,
                    export_name.as_deref(),
                    export_namespace.as_deref(),
                    lb_scheme,
                )?;
                self.api::<k8s::Import>().create(&params, &import).await?;
                println!("import/{name} created");
            }

            Command::Create(Create::Binding {
                import,
                peer,
                export_name,
            }) => {
                let api = self.api::<k8s::Import>();
                let mut resource = api
                    .get(&import)
                    .await
                    .with_context(|| format!("import/{import}"))?;
                let source = ImportSource {
                    peer: peer.clone(),
                    export_name: export_name.unwrap_or_else(|| import.clone()),
                    export_namespace: None,
                };
                if add_source(&mut resource, source) {
                    api.replace(&import, &params, &resource).await?;
                    println!("import/{import} bound to {peer}");
                } else {
                    println!("import/{import} already bound to {peer}");
                }
            }

            Command::Create(Create::Policy(policy)) => match policy.policy_type {
                PolicyType::Access => {
                    let name = policy
                        .name
                        .ok_or_else(|| anyhow!("access policies require --name"))?;
                    let action = policy
                        .action
                        .ok_or_else(|| anyhow!("access policies require --action"))?;
                    let rule = mk_rule(action, policy.from, policy.to);
                    if policy.privileged {
                        let resource = k8s::PrivilegedAccessPolicy::new(
                            &name,
                            k8s::multicluster::PrivilegedAccessPolicySpec { rule },
                        );
                        self.api().create(&params, &resource).await?;
                        println!("privilegedaccesspolicy/{name} created");
                    } else {
                        let resource = k8s::AccessPolicy::new(
                            &name,
                            k8s::multicluster::AccessPolicySpec { rule },
                        );
                        self.api().create(&params, &resource).await?;
                        println!("accesspolicy/{name} created");
                    }
                }
                PolicyType::Lb => {
                    let import = policy
                        .import
                        .ok_or_else(|| anyhow!("load-balancing policies require --import"))?;
                    let scheme = policy
                        .scheme
                        .ok_or_else(|| anyhow!("load-balancing policies require --scheme"))?;
                    let api = self.api::<k8s::Import>();
                    let mut resource = api
                        .get(&import)
                        .await
                        .with_context(|| format!("import/{import}"))?;
                    set_scheme(&mut resource, &scheme)?;
                    api.replace(&import, &params, &resource).await?;
                    println!("import/{import} uses {scheme}");
                }
            },

            Command::Get {
                kind,
                name,
                privileged,
            } => {
                let yaml = match kind {
                    GetKind::Peer => to_yaml(self.peers(), name).await?,
                    GetKind::Export => to_yaml(self.api::<k8s::Export>(), name).await?,
                    GetKind::Import => to_yaml(self.api::<k8s::Import>(), name).await?,
                    GetKind::Policy if privileged => {
                        to_yaml(self.api::<k8s::PrivilegedAccessPolicy>(), name).await?
                    }
                    GetKind::Policy => to_yaml(self.api::<k8s::AccessPolicy>(), name).await?,
                    GetKind::Binding => {
                        let imports = fetch(self.api::<k8s::Import>(), name).await?;
                        serde_yaml::to_string(&bindings(&imports))?
                    }
                };
                print!("{yaml}");
            }

            Command::Delete {
                kind,
                name,
                privileged,
            } => {
                let params = DeleteParams::default();
                let kind = match kind {
                    DeleteKind::Peer => {
                        self.peers().delete(&name, &params).await?;
                        "peer"
                    }
                    DeleteKind::Export => {
                        self.api::<k8s::Export>().delete(&name, &params).await?;
                        "export"
                    }
                    DeleteKind::Import => {
                        self.api::<k8s::Import>().delete(&name, &params).await?;
                        "import"
                    }
                    DeleteKind::Policy if privileged => {
                        self.api::<k8s::PrivilegedAccessPolicy>()
                            .delete(&name, &params)
                            .await?;
                        "privilegedaccesspolicy"
                    }
                    DeleteKind::Policy => {
                        self.api::<k8s::AccessPolicy>()
                            .delete(&name, &params)
                            .await?;
                        "accesspolicy"
                    }
                };
                println!("{kind}/{name} deleted");
            }
        }
        Ok(())
    }
}

async fn fetch<T>(api: Api<T>, name: Option<String>) -> Result<Vec<T>>
where
    T: Clone + std::fmt::Debug + serde::de::DeserializeOwned,
{
    match name {
        Some(name) => Ok(vec![api.get(&name).await?]),
        None => Ok(api.list(&ListParams::default()).await?.items),
    }
}

async fn to_yaml<T>(api: Api<T>, name: Option<String>) -> Result<String>
where
    T: Clone + std::fmt::Debug + serde::Serialize + serde::de::DeserializeOwned,
{
    let items = fetch(api, name).await?;
    Ok(serde_yaml::to_string(&items)?)
}

fn mk_peer(name: &str, host: String, port: u16) -> k8s::Peer {
    k8s::Peer::new(
        name,
        PeerSpec {
            gateways: vec![Endpoint { host, port }],
        },
    )
}

fn mk_export(name: &str, host: Option<String>, port: u16) -> k8s::Export {
    k8s::Export::new(name, ExportSpec { host, port })
}

fn mk_import(
    name: &str,
    port: u16,
    peers: &[String],
    export_name: Option<&str>,
    export_namespace: Option<&str>,
    lb_scheme: Option<String>,
) -> Result<k8s::Import> {
    if let Some(scheme) = &lb_scheme {
        LbScheme::from_str(scheme)?;
    }
    let mut import = k8s::Import::new(
        name,
        ImportSpec {
            port,
            sources: vec![],
            lb_scheme,
        },
    );
    for peer in peers {
        add_source(
            &mut import,
            ImportSource {
                peer: peer.clone(),
                export_name: export_name.unwrap_or(name).to_string(),
                export_namespace: export_namespace.map(Into::into),
            },
        );
    }
    Ok(import)
}

/// Appends a source unless an identical one is already declared.
fn add_source(import: &mut k8s::Import, source: ImportSource) -> bool {
    if import.spec.sources.contains(&source) {
        return false;
    }
    import.spec.sources.push(source);
    true
}

fn set_scheme(import: &mut k8s::Import, scheme: &str) -> Result<()> {
    let parsed = LbScheme::from_str(scheme)?;
    import.spec.lb_scheme = match parsed {
        LbScheme::Default => None,
        scheme => Some(scheme.to_string()),
    };
    Ok(())
}

fn mk_rule(action: ActionArg, from: Vec<Label>, to: Vec<Label>) -> AccessRule {
    let selector = |labels: Vec<Label>| WorkloadSetOrSelector {
        workload_selector: labels.into_iter().map(|Label(k, v)| (k, v)).collect::<Selector>(),
    };
    AccessRule {
        action: match action {
            ActionArg::Allow => PolicyAction::Allow,
            ActionArg::Deny => PolicyAction::Deny,
        },
        from: vec![selector(from)],
        to: vec![selector(to)],
    }
}

/// Lists the bindings recorded in each import's status, keyed by import name.
fn bindings(
    imports: &[k8s::Import],
) -> BTreeMap<String, Vec<k8s::multicluster::BindingStatus>> {
    imports
        .iter()
        .map(|import| {
            let bindings = import
                .status
                .as_ref()
                .map(|s| s.bindings.clone())
                .unwrap_or_default();
            (import.name_any(), bindings)
        })
        .collect()
}

// === impl Label ===

impl FromStr for Label {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((key, value)) = s.split_once('=') else {
            bail!("expected key=value: {s}");
        };
        if key.is_empty() {
            bail!("empty attribute key: {s}");
        }
        Ok(Self(key.to_string(), value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Command {
        let mut argv = vec!["clusterlink-ctl"];
        argv.extend_from_slice(args);
        Ctl::try_parse_from(argv).expect("arguments must parse").command
    }

    #[test]
    fn parses_labels() {
        assert_eq!(
            "app=reviews".parse::<Label>().unwrap(),
            Label("app".to_string(), "reviews".to_string())
        );
        assert_eq!(
            "tier=".parse::<Label>().unwrap(),
            Label("tier".to_string(), String::new())
        );
        assert!("reviews".parse::<Label>().is_err());
        assert!("=reviews".parse::<Label>().is_err());
    }

    #[test]
    fn import_sources_keep_peer_order() {
        let Command::Create(Create::Import {
            name,
            port,
            peers,
            export_name,
            export_namespace,
            lb_scheme,
        }) = parse(&[
            "create", "import", "--name", "reviews", "--port", "9080", "--peer", "mbg3",
            "--peer", "mbg2", "--peer", "mbg3", "--export-namespace", "ns-1",
        ])
        else {
            panic!("expected create import");
        };
        let import = mk_import(
            &name,
            port,
            &peers,
            export_name.as_deref(),
            export_namespace.as_deref(),
            lb_scheme,
        )
        .unwrap();

        let peers = import
            .spec
            .sources
            .iter()
            .map(|s| s.peer.as_str())
            .collect::<Vec<_>>();
        assert_eq!(peers, ["mbg3", "mbg2"]);
        assert!(import.spec.sources.iter().all(|s| s.export_name == "reviews"));
        assert!(import
            .spec
            .sources
            .iter()
            .all(|s| s.export_namespace.as_deref() == Some("ns-1")));
        assert_eq!(import.spec.lb_scheme, None);
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(mk_import("reviews", 9080, &[], None, None, Some("fastest".into())).is_err());

        let mut import = mk_import("reviews", 9080, &[], None, None, None).unwrap();
        assert!(set_scheme(&mut import, "fastest").is_err());
        set_scheme(&mut import, "Round-Robin").unwrap();
        assert_eq!(import.spec.lb_scheme.as_deref(), Some("ecmp"));
        set_scheme(&mut import, "").unwrap();
        assert_eq!(import.spec.lb_scheme, None);
    }

    #[test]
    fn binding_adds_one_source() {
        let mut import = mk_import("reviews", 9080, &["mbg2".into()], None, None, None).unwrap();
        let source = ImportSource {
            peer: "mbg3".to_string(),
            export_name: "reviews".to_string(),
            export_namespace: None,
        };
        assert!(add_source(&mut import, source.clone()));
        assert!(!add_source(&mut import, source));
        assert_eq!(import.spec.sources.len(), 2);
    }

    #[test]
    fn access_rules_select_attributes() {
        let Command::Create(Create::Policy(policy)) = parse(&[
            "create",
            "policy",
            "--type",
            "access",
            "--name",
            "deny-reviews",
            "--action",
            "deny",
            "--privileged",
            "--to",
            "clusterlink/metadata.serviceName=reviews",
        ]) else {
            panic!("expected create policy");
        };
        assert_eq!(policy.policy_type, PolicyType::Access);
        assert!(policy.privileged);

        let rule = mk_rule(policy.action.unwrap(), policy.from, policy.to);
        assert_eq!(rule.action, PolicyAction::Deny);
        assert!(rule.from[0].workload_selector.is_empty());
        assert_eq!(
            rule.to[0].workload_selector.match_labels,
            Some(btreemap! {
                "clusterlink/metadata.serviceName".to_string() => "reviews".to_string(),
            })
        );
    }

    #[test]
    fn expose_exports_the_service_host() {
        let Command::Expose { service, port } =
            parse(&["expose", "--service", "reviews", "--port", "9080"])
        else {
            panic!("expected expose");
        };
        let export = mk_export(&service, Some(service.clone()), port);
        assert_eq!(export.name_any(), "reviews");
        assert_eq!(export.spec.host.as_deref(), Some("reviews"));
        assert_eq!(export.spec.port, 9080);
    }

    #[test]
    fn lists_bindings_by_import() {
        let mut bound = mk_import("reviews", 9080, &["mbg2".into()], None, None, None).unwrap();
        bound.status = Some(k8s::multicluster::ImportStatus {
            phase: Some("Bound".to_string()),
            bindings: vec![k8s::multicluster::BindingStatus {
                peer: "mbg2".to_string(),
                export_name: "reviews".to_string(),
                export_namespace: "default".to_string(),
            }],
        });
        let pending = mk_import("ratings", 9080, &[], None, None, None).unwrap();

        let bindings = bindings(&[bound, pending]);
        assert_eq!(bindings["reviews"].len(), 1);
        assert_eq!(bindings["reviews"][0].peer, "mbg2");
        assert!(bindings["ratings"].is_empty());
    }

    #[test]
    fn get_and_delete_kinds() {
        assert!(matches!(
            parse(&["get", "binding"]),
            Command::Get {
                kind: GetKind::Binding,
                name: None,
                privileged: false,
            }
        ));
        assert!(matches!(
            parse(&["-n", "ns-1", "delete", "policy", "deny-reviews", "--privileged"]),
            Command::Delete {
                kind: DeleteKind::Policy,
                privileged: true,
                ..
            }
        ));
        assert!(Ctl::try_parse_from(["clusterlink-ctl", "delete", "binding", "reviews"]).is_err());
    }
}
