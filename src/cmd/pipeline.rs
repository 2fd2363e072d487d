//! Pipeline lifecycle commands: `start`, `advance`, `status`.

use anyhow::Result;

use workbench::config::WorkbenchConfig;
use workbench::pipeline::PipelineService;

use super::open_store;

fn service(config: &WorkbenchConfig) -> Result<PipelineService> {
    let store = open_store(config)?;
    PipelineService::from_config(config, store)
}

pub async fn cmd_start(
    config: &WorkbenchConfig,
    epic_id: &str,
    description: Option<&str>,
) -> Result<()> {
    let service = service(config)?;
    let pipeline = service.start_pipeline(epic_id, description).await?;

    println!("Started pipeline {}", console::style(&pipeline.pipeline_id).bold());
    println!("  epic:  {}", pipeline.epic_id);
    println!("  phase: {}", pipeline.current_phase);
    println!("  mode:  {}", service.mode());
    Ok(())
}

pub async fn cmd_advance(config: &WorkbenchConfig, pipeline_id: &str) -> Result<()> {
    let service = service(config)?;
    let advanced = service.advance_phase(pipeline_id).await?;

    println!(
        "{} {} -> {}",
        console::style("Advanced").green().bold(),
        advanced.previous_phase,
        advanced.current_phase
    );
    if let Some(completed_at) = advanced.completed_at {
        println!("Pipeline complete at {}", completed_at.to_rfc3339());
    }
    Ok(())
}

pub async fn cmd_status(config: &WorkbenchConfig, pipeline_id: &str, json: bool) -> Result<()> {
    let service = service(config)?;
    let Some(status) = service.get_status(pipeline_id).await? else {
        anyhow::bail!("Pipeline not found: {}", pipeline_id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let pipeline = &status.pipeline;
    println!();
    println!("Pipeline {}", console::style(&pipeline.pipeline_id).bold());
    println!("  epic:          {}", pipeline.epic_id);
    println!("  current phase: {}", pipeline.current_phase);
    println!("  created:       {}", pipeline.created_at.to_rfc3339());
    println!("  updated:       {}", pipeline.updated_at.to_rfc3339());
    if let Some(completed_at) = pipeline.completed_at {
        println!("  completed:     {}", completed_at.to_rfc3339());
    }
    println!();

    if pipeline.state.artifacts.is_empty() {
        println!("Artifacts: none");
    } else {
        println!("Artifacts:");
        for artifact_type in pipeline.state.artifacts.keys() {
            println!("  - {}", artifact_type);
        }
    }
    println!();

    if status.transitions.is_empty() {
        println!("History: none");
    } else {
        println!("History:");
        for t in &status.transitions {
            println!(
                "  {}  {:<13} -> {:<13} {}",
                t.timestamp.format("%Y-%m-%d %H:%M:%S"),
                t.from_state,
                t.to_state,
                console::style(&t.reason).dim()
            );
        }
    }
    println!();
    Ok(())
}
