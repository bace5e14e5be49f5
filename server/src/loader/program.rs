//! Admin management of the stored programs served by the two delivery variants.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::compiler::{compile, decode_program};
use crate::db::models::{StoredProgram, StoredScript};
use crate::state::AppState;
use crate::vm::{Value, Vm};

#[derive(Debug, Deserialize)]
pub struct PutScriptRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ScriptResponse {
    pub code: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct PutProgramRequest {
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct ProgramResponse {
    pub bytecode: String,
    pub instruction_count: i64,
    pub source_hash: String,
    pub updated_at: String,
}

/// Outcome of running the stored program server-side.
#[derive(Debug, Serialize)]
pub struct DryRunResponse {
    pub completed: bool,
    /// Instructions executed before completion or fault.
    pub executed: usize,
    pub stack: Vec<Value>,
    pub env: BTreeMap<String, Value>,
    pub error: Option<String>,
}

impl From<StoredScript> for ScriptResponse {
    fn from(s: StoredScript) -> Self {
        Self {
            code: s.code,
            updated_at: s.updated_at.to_rfc3339(),
        }
    }
}

impl From<StoredProgram> for ProgramResponse {
    fn from(p: StoredProgram) -> Self {
        Self {
            bytecode: p.bytecode,
            instruction_count: p.instruction_count,
            source_hash: p.source_hash,
            updated_at: p.updated_at.to_rfc3339(),
        }
    }
}

/// GET /api/loader/script
pub async fn get_script(
    State(state): State<AppState>,
) -> Result<Json<ScriptResponse>, (StatusCode, String)> {
    let store = state.store.clone();

    let script = tokio::task::spawn_blocking(move || store.script())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??
        .ok_or((StatusCode::NOT_FOUND, "No main script found".to_string()))?;

    Ok(Json(script.into()))
}

/// PUT /api/loader/script — Replace the raw script. Existing routes serve
/// the new script on their next use.
pub async fn put_script(
    State(state): State<AppState>,
    Json(req): Json<PutScriptRequest>,
) -> Result<Json<ScriptResponse>, (StatusCode, String)> {
    let script = StoredScript {
        code: req.code,
        updated_at: Utc::now(),
    };

    let store = state.store.clone();
    let to_save = script.clone();
    tokio::task::spawn_blocking(move || store.save_script(&to_save))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    tracing::info!(bytes = script.code.len(), "Main script updated");
    Ok(Json(script.into()))
}

/// GET /api/loader/vm
pub async fn get_program(
    State(state): State<AppState>,
) -> Result<Json<ProgramResponse>, (StatusCode, String)> {
    let store = state.store.clone();

    let program = tokio::task::spawn_blocking(move || store.program())
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??
        .ok_or((StatusCode::NOT_FOUND, "No VM program compiled".to_string()))?;

    Ok(Json(program.into()))
}

/// PUT /api/loader/vm — Compile source and store the instruction string.
pub async fn put_program(
    State(state): State<AppState>,
    Json(req): Json<PutProgramRequest>,
) -> Result<Json<ProgramResponse>, (StatusCode, String)> {
    let store = state.store.clone();

    let program = tokio::task::spawn_blocking(move || {
        let compiled = compile(&req.source);
        let program = StoredProgram {
            bytecode: compiled.bytecode,
            instruction_count: compiled.instruction_count as i64,
            source_hash: compiled.source_hash,
            updated_at: Utc::now(),
        };
        store.save_program(&program)?;
        Ok::<_, (StatusCode, String)>(program)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    tracing::info!(
        instructions = program.instruction_count,
        source_hash = %program.source_hash,
        "VM program compiled"
    );
    Ok(Json(program.into()))
}

/// Run `bytecode` to completion or first fault, keeping the partial state.
pub fn dry_run(bytecode: &str, max_stack: usize) -> Result<DryRunResponse, (StatusCode, String)> {
    let instructions = decode_program(bytecode).map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Stored program is corrupt: {}", e),
        )
    })?;

    let mut vm = Vm::with_max_stack(max_stack);
    let result = vm.run(&instructions);

    Ok(DryRunResponse {
        completed: result.is_ok(),
        executed: vm.pc(),
        stack: vm.stack().to_vec(),
        env: vm.env().clone(),
        error: result.err().map(|e| e.to_string()),
    })
}

/// POST /api/loader/vm/dry-run — Execute the stored program on the server
/// and report the final stack and environment. Faults are reported in the
/// body, not as an error status.
pub async fn dry_run_program(
    State(state): State<AppState>,
) -> Result<Json<DryRunResponse>, (StatusCode, String)> {
    let store = state.store.clone();
    let max_stack = state.loader.vm_max_stack;

    let report = tokio::task::spawn_blocking(move || {
        let program = store
            .program()?
            .ok_or((StatusCode::NOT_FOUND, "No VM program compiled".to_string()))?;
        dry_run(&program.bytecode, max_stack)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join: {}", e)))??;

    if let Some(error) = &report.error {
        tracing::debug!(error = %error, executed = report.executed, "Dry run faulted");
    }
    Ok(Json(report))
}
