//! Command handlers for CLI operations
//!
//! - run: execute an instruction to completion
//! - capabilities: list registered capabilities
//! - validate: run the sandbox validator on a source file

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

use crate::conductor::approval::scrub;
use crate::conductor::{
    build_executor, AbortHandle, ApprovalSignal, FixedSignal, SessionOutcome, SessionReport,
    TerminalSignal,
};
use crate::config::Config;
use crate::llm::provider_from_config;
use crate::registry::CapabilityRegistry;
use crate::sandbox::{self, SandboxPolicy, ValidationReport};
use crate::tools::register_builtins;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Registry holding the built-in capabilities for the configured workspace
fn builtin_registry(config: &Config) -> Result<Arc<CapabilityRegistry>> {
    let registry = Arc::new(CapabilityRegistry::new());
    register_builtins(&registry, config.core.workspace.clone())
        .context("Failed to register built-in capabilities")?;
    Ok(registry)
}

/// Run an instruction to completion
///
/// Ctrl-C aborts the session between steps. The process exits non-zero
/// when the session fails.
pub async fn handle_run(
    instruction: String,
    yes: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let registry = builtin_registry(config)?;
    let llm = provider_from_config(&config.llm).context("Failed to create LLM provider")?;
    let signal: Arc<dyn ApprovalSignal> = if yes || config.approval.auto_approve {
        Arc::new(FixedSignal(true))
    } else {
        Arc::new(TerminalSignal)
    };
    let executor = build_executor(config, registry, llm, signal);

    let (handle, abort) = AbortHandle::pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, aborting after the current step");
            handle.abort();
        }
    });

    if let OutputFormat::Text = format {
        println!("Instruction: {}", instruction);
        println!();
    }

    let report = executor.run_with_abort(&instruction, abort).await;

    match format {
        OutputFormat::Text => println!("{}", render_report(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report_json(&report))?),
    }

    if let SessionOutcome::Failed { error, .. } = &report.outcome {
        bail!("session failed: {}", scrub(&error.to_string()));
    }
    Ok(())
}

/// Human-readable session report
pub fn render_report(report: &SessionReport) -> String {
    let mut out = Vec::new();

    for (i, step) in report.steps.iter().enumerate() {
        let mark = if step.success() { "✓" } else { "✗" };
        out.push(format!("{} {}. {}", mark, i + 1, step.step.render()));
        for line in step.combined_text().lines() {
            out.push(format!("     {}", scrub(line)));
        }
    }
    if !report.steps.is_empty() {
        out.push(String::new());
    }

    match &report.outcome {
        SessionOutcome::Completed { answer } => {
            out.push("Result:".to_string());
            out.push(scrub(answer));
            out.push(String::new());
            out.push("✓ Session completed".to_string());
        }
        SessionOutcome::Failed {
            error,
            state,
            last_completed,
            memory,
        } => {
            out.push(format!("✗ Session failed: {}", scrub(&error.to_string())));
            out.push(format!("  State: {}", state));
            out.push(format!(
                "  Last completed step: {}",
                last_completed.as_deref().unwrap_or("(none)")
            ));
            if let Some(memory) = memory {
                out.push("  Memory:".to_string());
                for line in memory.summarize(usize::MAX, 200).lines() {
                    out.push(format!("    {}", scrub(line)));
                }
            }
        }
    }

    let prompted = report.approvals.iter().filter(|a| a.prompted).count();
    if prompted > 0 {
        out.push(format!("  Approvals requested: {}", prompted));
    }

    out.join("\n")
}

/// Machine-readable session report
pub fn report_json(report: &SessionReport) -> Value {
    let steps: Vec<Value> = report
        .steps
        .iter()
        .map(|step| {
            json!({
                "step": step.step.render(),
                "dynamic": step.step.dynamic,
                "success": step.success(),
                "results": step.results,
                "stopped": step.stopped,
            })
        })
        .collect();

    let mut output = json!({
        "instruction": report.instruction,
        "steps": steps,
        "approvals": report.approvals,
    });

    match &report.outcome {
        SessionOutcome::Completed { answer } => {
            output["status"] = json!("completed");
            output["answer"] = json!(scrub(answer));
        }
        SessionOutcome::Failed {
            error,
            state,
            last_completed,
            memory,
        } => {
            output["status"] = json!("failed");
            output["error"] = json!(scrub(&error.to_string()));
            output["state"] = json!(state);
            output["last_completed"] = json!(last_completed);
            if let Some(memory) = memory {
                output["memory"] = json!(memory);
            }
        }
    }

    output
}

/// List registered capabilities
///
/// Generated capabilities live only as long as the process that created
/// them, so a fresh process lists the built-ins.
pub async fn handle_capabilities(
    namespace: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let registry = builtin_registry(config)?;
    let descriptors = registry.list(namespace.as_deref());

    match format {
        OutputFormat::Text => {
            if descriptors.is_empty() {
                println!("No capabilities registered.");
                return Ok(());
            }
            println!("Capabilities:");
            println!();
            for descriptor in &descriptors {
                println!(
                    "  {}  [{}, {}, v{}]",
                    descriptor.signature(),
                    descriptor.side_effect,
                    descriptor.origin,
                    descriptor.version
                );
                println!("      {}", descriptor.description);
            }
        }
        OutputFormat::Json => {
            let output = json!({ "capabilities": descriptors });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Run the sandbox validator on a source file and print the report
pub async fn handle_validate(file: &Path, config: &Config, format: OutputFormat) -> Result<()> {
    let source = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let policy = SandboxPolicy::from_config(&config.sandbox, config.sandbox_dir());
    let report = sandbox::validate(&source, &policy);

    match format {
        OutputFormat::Text => println!("{}", render_validation(file, &report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if !report.passed {
        bail!(
            "{} rejected with {} violation(s)",
            file.display(),
            report.violations.len()
        );
    }
    Ok(())
}

fn render_validation(file: &Path, report: &ValidationReport) -> String {
    let mut out = vec![format!("{}  (sha256 {})", file.display(), report.source_hash)];
    if report.passed {
        out.push("✓ Passed".to_string());
        if report.effects.writes_files {
            out.push("  writes files".to_string());
        }
        if report.effects.invokes_host {
            let targets: Vec<&str> = report
                .effects
                .invoke_targets
                .iter()
                .map(String::as_str)
                .collect();
            out.push(format!("  invokes {}", targets.join(", ")));
        }
    } else {
        out.push(format!("✗ Rejected ({} violations)", report.violations.len()));
        for violation in &report.violations {
            out.push(format!("  {}", violation));
        }
    }
    out.join("\n")
}
