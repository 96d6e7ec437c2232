//! Dynamic Capability Synthesizer
//!
//! Asks the model for a new capability unit, passes its source through the
//! sandbox gate and registers it only when the report is clean. A rejected
//! unit is never retried here; the caller may re-request with amended
//! constraints.

use crate::conductor::types::CapabilityRequest;
use crate::llm::{complete_with_timeout, extract_json_object, LLMError, LLMProvider};
use crate::registry::{CapabilityRegistry, RegistryError};
use crate::sandbox::{self, GeneratedCapability, SandboxPolicy, Violation};
use sdk::descriptor::{CapabilityDescriptor, Origin, ParamSpec, SideEffect};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("generated unit for '{name}' failed validation: {}", list_violations(.violations))]
    Validation {
        name: String,
        violations: Vec<Violation>,
    },

    #[error("language model transport failed: {0}")]
    Transport(#[from] LLMError),

    #[error("generated unit is malformed: {0}")]
    Malformed(String),

    #[error("registration failed: {0}")]
    Registration(#[from] RegistryError),

    #[error("failed to store generated unit: {0}")]
    Storage(#[from] std::io::Error),
}

fn list_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Wire shape of the model's answer
#[derive(Debug, Deserialize)]
struct RawUnit {
    #[serde(default)]
    description: String,
    #[serde(default)]
    params: Vec<ParamSpec>,
    side_effect: String,
    #[serde(default)]
    examples: Vec<String>,
    source: String,
}

/// Where and how generated units live
#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub generated_dir: PathBuf,
    pub interpreter: Vec<String>,
    pub llm_timeout: Duration,
    pub call_timeout: Duration,
}

pub struct Synthesizer {
    llm: Arc<dyn LLMProvider>,
    registry: Arc<CapabilityRegistry>,
    policy: SandboxPolicy,
    settings: SynthesisSettings,
}

impl Synthesizer {
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        registry: Arc<CapabilityRegistry>,
        policy: SandboxPolicy,
        settings: SynthesisSettings,
    ) -> Self {
        Self {
            llm,
            registry,
            policy,
            settings,
        }
    }

    /// Generate, validate and register the capability `request` describes.
    ///
    /// If a generated capability already holds the name it is superseded by
    /// the next version. Built-in names are refused.
    pub async fn synthesize(
        &self,
        request: &CapabilityRequest,
    ) -> Result<CapabilityDescriptor, SynthesisError> {
        let existing = self.registry.resolve(&request.name).ok();
        if let Some(entry) = &existing {
            if entry.descriptor.origin == Origin::Builtin {
                return Err(RegistryError::BuiltinOverride(request.name.clone()).into());
            }
        }

        info!("Synthesizing {}", request.name);
        let prompt = self.build_prompt(request);
        let raw = complete_with_timeout(
            self.llm.as_ref(),
            &prompt,
            true,
            self.settings.llm_timeout,
        )
        .await?;
        let unit = parse_unit(&raw)?;

        let report = sandbox::validate(&unit.source, &self.policy);
        if !report.passed {
            warn!(
                "Generated unit for {} rejected: {}",
                request.name,
                list_violations(&report.violations)
            );
            return Err(SynthesisError::Validation {
                name: request.name.clone(),
                violations: report.violations,
            });
        }

        let declared = SideEffect::parse(&unit.side_effect)
            .ok_or_else(|| SynthesisError::Malformed(format!("unknown side effect '{}'", unit.side_effect)))?;
        let mut side_effect = if report.effects.writes_files || report.effects.invokes_host {
            declared.max(SideEffect::Write)
        } else {
            declared
        };
        // A unit is at least as risky as anything it calls
        for target in &report.effects.invoke_targets {
            if *target == request.name {
                return Err(SynthesisError::Malformed(format!("{} invokes itself", target)));
            }
            let entry = self.registry.resolve(target).map_err(|_| {
                SynthesisError::Malformed(format!("invokes unknown capability '{}'", target))
            })?;
            side_effect = side_effect.max(entry.descriptor.side_effect);
        }
        if side_effect != declared {
            info!("Raised side effect of {} from {} to {}", request.name, declared, side_effect);
        }

        let description = if unit.description.trim().is_empty() {
            request.description.clone()
        } else {
            unit.description
        };
        let mut descriptor =
            CapabilityDescriptor::new(&request.name, description, side_effect, Origin::Generated);
        descriptor.params = unit.params;
        descriptor.examples = if unit.examples.is_empty() {
            request.examples.clone()
        } else {
            unit.examples
        };
        descriptor
            .validate_schema()
            .map_err(|e| SynthesisError::Malformed(e.to_string()))?;

        let current_version = existing.as_ref().map(|e| e.descriptor.version);
        descriptor.version = current_version.map_or(1, |v| v + 1);

        let unit_path = self
            .store(&descriptor, &unit.source, &report.source_hash)
            .await?;
        let handler = Arc::new(
            GeneratedCapability::new(
                &descriptor.name,
                unit_path.clone(),
                self.policy.sandbox_root.clone(),
                self.settings.interpreter.clone(),
                self.settings.call_timeout,
                Arc::downgrade(&self.registry),
            )
            .with_targets(report.effects.invoke_targets.clone(), side_effect),
        );

        let registered = match current_version {
            Some(version) => self.registry.supersede(descriptor, handler, version),
            None => self
                .registry
                .register(descriptor.clone(), handler)
                .map(|_| descriptor),
        };
        let registered = match registered {
            Ok(registered) => registered,
            Err(e) => {
                if let Err(remove) = tokio::fs::remove_file(&unit_path).await {
                    warn!("Could not remove {}: {}", unit_path.display(), remove);
                }
                return Err(e.into());
            }
        };
        info!(
            "Registered generated {} v{} [{}]",
            registered.name, registered.version, registered.side_effect
        );
        Ok(registered)
    }

    /// Write the validated source to
    /// `<generated>/<namespace>/<action>.v<version>.<hash12>.py`
    async fn store(
        &self,
        descriptor: &CapabilityDescriptor,
        source: &str,
        source_hash: &str,
    ) -> Result<PathBuf, SynthesisError> {
        let dir = self.settings.generated_dir.join(descriptor.namespace());
        tokio::fs::create_dir_all(&dir).await?;
        let path = unit_file(&dir, descriptor, source_hash);
        tokio::fs::write(&path, source).await?;
        Ok(path)
    }

    fn build_prompt(&self, request: &CapabilityRequest) -> String {
        let examples = if request.examples.is_empty() {
            "(none)".to_string()
        } else {
            request.examples.join("\n")
        };
        let constraints = if request.constraints.is_empty() {
            String::new()
        } else {
            format!("Additional constraints:\n- {}\n", request.constraints.join("\n- "))
        };

        format!(
            "Write a new capability for a local assistant as a Python 3 script.\n\n\
            Capability: {name}\n\
            Purpose: {description}\n\
            Example invocations:\n{examples}\n\n\
            The script must define `def run(args):` where args is a dict of string values.\n\
            It returns a string, or a dict {{\"text\": str, \"identifiers\": [{{\"kind\": str, \"value\": str}}]}}.\n\n\
            Approved interfaces (nothing else is available):\n\
            - modules: {modules}\n\
            - host.invoke(name, args): call another capability by qualified name, returns its text\n\
            - host.sandbox_path(relative): the only way to build a file path\n\
            No eval/exec/compile, no dynamic imports or getattr with computed names,\n\
            no environment variables, no network access except through host.invoke.\n\
            {constraints}\n\
            Names already taken (call them through host.invoke, do not redefine): {taken}\n\n\
            Respond with ONE JSON object only:\n\
            {{\"description\": str, \"params\": [{{\"name\": str, \"type\": \"string|integer|boolean\", \"required\": bool}}],\n \
            \"side_effect\": \"none|read|write|network|destructive\", \"examples\": [str], \"source\": str}}\n",
            name = request.name,
            description = request.description,
            examples = examples,
            modules = self.policy.describe_modules(),
            constraints = constraints,
            taken = self.registry.names().join(", "),
        )
    }
}

fn unit_file(dir: &Path, descriptor: &CapabilityDescriptor, source_hash: &str) -> PathBuf {
    let short = &source_hash[..source_hash.len().min(12)];
    dir.join(format!(
        "{}.v{}.{}.py",
        descriptor.action(),
        descriptor.version,
        short
    ))
}

fn parse_unit(raw: &str) -> Result<RawUnit, SynthesisError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| SynthesisError::Malformed("response contains no JSON object".to_string()))?;
    let unit: RawUnit = serde_json::from_str(json)
        .map_err(|e| SynthesisError::Malformed(format!("unexpected response shape: {}", e)))?;
    if !unit.source.contains("def run(") {
        return Err(SynthesisError::Malformed(
            "source does not define run(args)".to_string(),
        ));
    }
    Ok(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::RuleClass;
    use async_trait::async_trait;
    use sdk::capability::FnCapability;
    use sdk::types::{CapabilityInput, CapabilityOutput};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct OneReply(Mutex<Option<String>>);

    #[async_trait]
    impl LLMProvider for OneReply {
        fn name(&self) -> &str {
            "one-reply"
        }

        async fn complete(&self, _prompt: &str, _structured: bool) -> crate::llm::Result<String> {
            self.0
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| LLMError::ProviderUnavailable("already answered".into()))
        }
    }

    fn unit_json(source: &str, side_effect: &str) -> String {
        serde_json::json!({
            "description": "apply a label",
            "params": [{"name": "id", "type": "string", "required": true}],
            "side_effect": side_effect,
            "examples": ["label:apply id=7"],
            "source": source,
        })
        .to_string()
    }

    fn synthesizer(temp: &TempDir, registry: Arc<CapabilityRegistry>, reply: String) -> Synthesizer {
        Synthesizer::new(
            Arc::new(OneReply(Mutex::new(Some(reply)))),
            registry,
            SandboxPolicy::new(temp.path().join("sandbox")),
            SynthesisSettings {
                generated_dir: temp.path().join("generated"),
                interpreter: vec!["python3".to_string()],
                llm_timeout: Duration::from_secs(5),
                call_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn test_clean_unit_registered_and_stored() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(CapabilityRegistry::new());
        let source = "def run(args):\n    return 'labelled ' + args['id']\n";
        let synth = synthesizer(&temp, registry.clone(), unit_json(source, "read"));

        let descriptor = synth
            .synthesize(&CapabilityRequest::new("label:apply", "apply a label"))
            .await
            .unwrap();
        assert_eq!(descriptor.origin, Origin::Generated);
        assert_eq!(descriptor.version, 1);
        assert_eq!(descriptor.side_effect, SideEffect::Read);
        assert_eq!(registry.resolve("label:apply").unwrap().descriptor, descriptor);

        let stored: Vec<_> = std::fs::read_dir(temp.path().join("generated/label"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].starts_with("apply.v1."));
        assert!(stored[0].ends_with(".py"));
    }

    #[tokio::test]
    async fn test_dynamic_execution_rejected_and_not_registered() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(CapabilityRegistry::new());
        let source = "def run(args):\n    return eval(args['expr'])\n";
        let synth = synthesizer(&temp, registry.clone(), unit_json(source, "none"));

        let err = synth
            .synthesize(&CapabilityRequest::new("label:apply", "apply a label"))
            .await
            .unwrap_err();
        match err {
            SynthesisError::Validation { violations, .. } => {
                assert_eq!(violations[0].rule, RuleClass::DynamicExecution);
                assert_eq!(violations[0].construct, "eval");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(registry.resolve("label:apply").is_err());
        assert!(!temp.path().join("generated").exists());
    }

    fn register_builtin(registry: &CapabilityRegistry, name: &str, side_effect: SideEffect) {
        registry
            .register(
                CapabilityDescriptor::new(name, name, side_effect, Origin::Builtin),
                Arc::new(FnCapability::new(|_i: CapabilityInput| Ok(CapabilityOutput::text("")))),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_side_effect_raised_for_host_invoke() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(CapabilityRegistry::new());
        register_builtin(&registry, "mail:archive", SideEffect::Read);
        let source = "import host\ndef run(args):\n    return host.invoke('mail:archive', {'id': args['id']})\n";
        let synth = synthesizer(&temp, registry.clone(), unit_json(source, "read"));

        let descriptor = synth
            .synthesize(&CapabilityRequest::new("label:apply", "apply a label"))
            .await
            .unwrap();
        assert_eq!(descriptor.side_effect, SideEffect::Write);
        assert!(descriptor.requires_approval());
    }

    #[tokio::test]
    async fn test_side_effect_raised_to_riskiest_target() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(CapabilityRegistry::new());
        register_builtin(&registry, "mail:archive", SideEffect::Write);
        register_builtin(&registry, "files:wipe", SideEffect::Destructive);
        let source = "import host\ndef run(args):\n    host.invoke('mail:archive', {'id': args['id']})\n    return host.invoke('files:wipe', {})\n";
        let synth = synthesizer(&temp, registry.clone(), unit_json(source, "write"));

        let descriptor = synth
            .synthesize(&CapabilityRequest::new("label:apply", "apply a label"))
            .await
            .unwrap();
        assert_eq!(descriptor.side_effect, SideEffect::Destructive);
    }

    #[tokio::test]
    async fn test_unknown_invoke_target_refused() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(CapabilityRegistry::new());
        let source = "import host\ndef run(args):\n    return host.invoke('files:wipe', {})\n";
        let synth = synthesizer(&temp, registry.clone(), unit_json(source, "write"));

        let err = synth
            .synthesize(&CapabilityRequest::new("label:apply", "apply a label"))
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Malformed(ref m) if m.contains("files:wipe")));
        assert!(registry.resolve("label:apply").is_err());
    }

    /// Registers the requested name while the model is answering, like a
    /// second session finishing first
    struct RacingReply {
        registry: Arc<CapabilityRegistry>,
        reply: Mutex<Option<String>>,
    }

    #[async_trait]
    impl LLMProvider for RacingReply {
        fn name(&self) -> &str {
            "racing"
        }

        async fn complete(&self, _prompt: &str, _structured: bool) -> crate::llm::Result<String> {
            self.registry
                .register(
                    CapabilityDescriptor::new("label:apply", "other", SideEffect::None, Origin::Generated),
                    Arc::new(FnCapability::new(|_i: CapabilityInput| Ok(CapabilityOutput::text("")))),
                )
                .unwrap();
            self.reply
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| LLMError::ProviderUnavailable("already answered".into()))
        }
    }

    #[tokio::test]
    async fn test_lost_registration_leaves_no_unit_file() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(CapabilityRegistry::new());
        let synth = Synthesizer::new(
            Arc::new(RacingReply {
                registry: registry.clone(),
                reply: Mutex::new(Some(unit_json("def run(args):\n    return 'x'\n", "none"))),
            }),
            registry.clone(),
            SandboxPolicy::new(temp.path().join("sandbox")),
            SynthesisSettings {
                generated_dir: temp.path().join("generated"),
                interpreter: vec!["python3".to_string()],
                llm_timeout: Duration::from_secs(5),
                call_timeout: Duration::from_secs(5),
            },
        );

        let err = synth
            .synthesize(&CapabilityRequest::new("label:apply", "apply a label"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::Registration(RegistryError::Duplicate(_))
        ));
        let stored = std::fs::read_dir(temp.path().join("generated/label")).unwrap().count();
        assert_eq!(stored, 0);
        assert_eq!(registry.resolve("label:apply").unwrap().descriptor.description, "other");
    }

    #[tokio::test]
    async fn test_regeneration_supersedes() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(CapabilityRegistry::new());
        let first = synthesizer(
            &temp,
            registry.clone(),
            unit_json("def run(args):\n    return 'v1'\n", "none"),
        );
        first
            .synthesize(&CapabilityRequest::new("label:apply", "apply a label"))
            .await
            .unwrap();

        let second = synthesizer(
            &temp,
            registry.clone(),
            unit_json("def run(args):\n    return 'v2'\n", "none"),
        );
        let descriptor = second
            .synthesize(&CapabilityRequest::new("label:apply", "apply a label"))
            .await
            .unwrap();
        assert_eq!(descriptor.version, 2);
        assert_eq!(registry.resolve("label:apply").unwrap().descriptor.version, 2);
    }

    #[tokio::test]
    async fn test_builtin_name_refused() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(CapabilityRegistry::new());
        registry
            .register(
                CapabilityDescriptor::new("mail:send", "send", SideEffect::Write, Origin::Builtin),
                Arc::new(FnCapability::new(|_i: CapabilityInput| Ok(CapabilityOutput::text("")))),
            )
            .unwrap();
        let synth = synthesizer(&temp, registry, unit_json("def run(args):\n    return ''\n", "none"));

        let err = synth
            .synthesize(&CapabilityRequest::new("mail:send", "send better"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::Registration(RegistryError::BuiltinOverride(_))
        ));
    }

    #[test]
    fn test_parse_unit_requires_run() {
        assert!(matches!(
            parse_unit(&unit_json("x = 1\n", "none")),
            Err(SynthesisError::Malformed(_))
        ));
        assert!(matches!(
            parse_unit("no json here"),
            Err(SynthesisError::Malformed(_))
        ));
    }
}
