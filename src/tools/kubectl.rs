//! kubectl tool - run kubectl against the configured cluster

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;
use tracing::debug;

use super::{capture_output, command_arg, split_words, ModifiesResource, Tool};
use crate::error::Error;
use crate::Result;

const READ_VERBS: &[&str] = &[
    "get",
    "describe",
    "logs",
    "explain",
    "top",
    "version",
    "api-resources",
    "api-versions",
    "cluster-info",
];

const WRITE_VERBS: &[&str] = &[
    "apply",
    "create",
    "delete",
    "edit",
    "patch",
    "replace",
    "scale",
    "rollout",
    "label",
    "annotate",
    "set",
    "expose",
    "run",
    "cordon",
    "uncordon",
    "drain",
    "taint",
    "cp",
    "autoscale",
    "certificate",
];

const READ_CONFIG_SUBCOMMANDS: &[&str] = &["view", "get-contexts", "current-context"];

/// Flags that take a value, so the value is not mistaken for the verb.
const VALUE_FLAGS: &[&str] = &[
    "-n",
    "--namespace",
    "--context",
    "--kubeconfig",
    "--cluster",
    "--user",
    "-s",
    "--server",
    "--token",
    "--as",
];

/// Positional words after `kubectl`, skipping global flags.
fn positional_words(words: &[String]) -> Vec<&str> {
    let mut positional = Vec::new();
    let mut skip_next = false;
    for word in words.iter().skip(1) {
        if skip_next {
            skip_next = false;
            continue;
        }
        if word.starts_with('-') {
            skip_next = !word.contains('=') && VALUE_FLAGS.contains(&word.as_str());
            continue;
        }
        positional.push(word.as_str());
    }
    positional
}

fn words_of(command: &str) -> Option<Vec<String>> {
    let words = split_words(command);
    let program = words.first()?;
    let base = program.rsplit('/').next().unwrap_or(program);
    (base == "kubectl").then_some(words)
}

/// Classify a kubectl command line by its verb.
pub fn classify_kubectl(command: &str) -> ModifiesResource {
    let Some(words) = words_of(command) else {
        return ModifiesResource::Unknown;
    };
    let positional = positional_words(&words);
    let Some(verb) = positional.first().copied() else {
        return ModifiesResource::Unknown;
    };

    if READ_VERBS.contains(&verb) {
        return ModifiesResource::No;
    }
    if WRITE_VERBS.contains(&verb) {
        return ModifiesResource::Yes;
    }
    match (verb, positional.get(1).copied()) {
        ("config", Some(sub)) if READ_CONFIG_SUBCOMMANDS.contains(&sub) => ModifiesResource::No,
        ("auth", Some("can-i")) => ModifiesResource::No,
        _ => ModifiesResource::Unknown,
    }
}

fn has_flag(words: &[String], short: char, long: &str) -> bool {
    words.iter().any(|w| {
        w == long
            || (w.starts_with('-') && !w.starts_with("--") && w[1..].contains(short))
    })
}

/// Whether a kubectl command line needs a terminal.
pub fn is_interactive_kubectl(command: &str) -> bool {
    let Some(words) = words_of(command) else {
        return false;
    };
    let positional = positional_words(&words);
    match positional.first().copied() {
        Some("exec") => has_flag(&words, 'i', "--stdin") && has_flag(&words, 't', "--tty"),
        Some("attach") => has_flag(&words, 'i', "--stdin"),
        Some("edit") | Some("port-forward") | Some("proxy") => true,
        _ => false,
    }
}

/// Run kubectl commands
pub struct KubectlTool {
    kubeconfig: Option<PathBuf>,
    work_dir: Option<PathBuf>,
}

impl KubectlTool {
    pub fn new(kubeconfig: Option<PathBuf>, work_dir: Option<PathBuf>) -> Self {
        Self {
            kubeconfig,
            work_dir,
        }
    }
}

#[async_trait]
impl Tool for KubectlTool {
    fn name(&self) -> &str {
        "kubectl"
    }

    fn description(&self) -> &str {
        "Executes a kubectl command against the user's Kubernetes cluster. \
         Use it to inspect and manage cluster resources. Interactive commands \
         (exec -it, edit, port-forward) are not supported."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The complete kubectl command to execute, including the 'kubectl' prefix, e.g. 'kubectl get pods -n default'"
                }
            },
            "required": ["command"]
        })
    }

    async fn run(&self, args: &Map<String, Value>) -> Result<Value> {
        let command = command_arg(args)?;
        let words = words_of(command)
            .ok_or_else(|| Error::Tool(format!("not a kubectl command: {}", command)))?;

        debug!(command, "running kubectl");
        let mut cmd = Command::new("kubectl");
        cmd.args(&words[1..]);
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.env("KUBECONFIG", kubeconfig);
        }
        capture_output(cmd, self.work_dir.as_deref()).await
    }

    fn is_interactive(&self, args: &Map<String, Value>) -> Result<bool> {
        Ok(is_interactive_kubectl(command_arg(args)?))
    }

    fn check_modifies_resource(&self, args: &Map<String, Value>) -> ModifiesResource {
        match command_arg(args) {
            Ok(command) => classify_kubectl(command),
            Err(_) => ModifiesResource::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_read_verbs() {
        for command in [
            "kubectl get pods",
            "kubectl -n kube-system get pods -o wide",
            "kubectl --context prod describe deployment web",
            "kubectl logs web-123 --tail=50",
            "kubectl config current-context",
            "kubectl auth can-i create pods",
            "/usr/local/bin/kubectl version",
        ] {
            assert_eq!(classify_kubectl(command), ModifiesResource::No, "{command}");
        }
    }

    #[test]
    fn test_classify_write_verbs() {
        for command in [
            "kubectl delete deployment foo",
            "kubectl apply -f manifest.yaml",
            "kubectl --namespace=prod scale deploy web --replicas=3",
            "kubectl rollout restart deployment/web",
            "kubectl drain node-1 --ignore-daemonsets",
        ] {
            assert_eq!(classify_kubectl(command), ModifiesResource::Yes, "{command}");
        }
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify_kubectl("kubectl"), ModifiesResource::Unknown);
        assert_eq!(classify_kubectl("kubectl plugin-thing"), ModifiesResource::Unknown);
        assert_eq!(classify_kubectl("kubectl config use-context prod"), ModifiesResource::Unknown);
        assert_eq!(classify_kubectl("helm list"), ModifiesResource::Unknown);
    }

    #[test]
    fn test_interactive_commands() {
        assert!(is_interactive_kubectl("kubectl exec -it web-1 -- sh"));
        assert!(is_interactive_kubectl("kubectl exec --stdin --tty web-1 -- sh"));
        assert!(!is_interactive_kubectl("kubectl exec web-1 -- ls"));
        assert!(is_interactive_kubectl("kubectl attach -i web-1"));
        assert!(is_interactive_kubectl("kubectl edit deploy web"));
        assert!(is_interactive_kubectl("kubectl port-forward svc/web 8080:80"));
        assert!(is_interactive_kubectl("kubectl proxy"));
        assert!(!is_interactive_kubectl("kubectl get pods"));
    }

    #[test]
    fn test_missing_command_is_unknown() {
        let tool = KubectlTool::new(None, None);
        assert_eq!(tool.check_modifies_resource(&Map::new()), ModifiesResource::Unknown);
        assert!(tool.is_interactive(&Map::new()).is_err());
    }

    #[tokio::test]
    async fn test_run_rejects_non_kubectl() {
        let tool = KubectlTool::new(None, None);
        let mut args = Map::new();
        args.insert("command".to_string(), json!("rm -rf /"));
        assert!(matches!(tool.run(&args).await, Err(Error::Tool(_))));
    }
}
