//! Flat C-compatible surface for host applications.
//!
//! Results are plain `#[repr(C)]` structs carrying an `error_code` (see
//! [`ErrorCode`]); every other field is zeroed unless the code is 0. The
//! analysis runtime is a process-wide singleton here and only here: call
//! `harmonia_init` before any analysis and `harmonia_shutdown` after the last.

use std::ffi::{c_char, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::RwLock;

use crate::cancel::CancellationToken;
use crate::config::load_config;
use crate::error::{AnalysisError, ErrorCode, Result};
use crate::orchestrator::{AnalysisSettings, Analyzer, RhythmKeyReport, Runtime, StyleReport};

/// Fixed capacity of [`HarmoniaStyleResult`]'s arrays.
pub const STYLE_RESULT_CAPACITY: usize = 5;

static RUNTIME: RwLock<Option<Runtime>> = RwLock::new(None);

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HarmoniaAnalysisResult {
    pub bpm: f32,
    pub bpm_confidence: f32,
    /// -1 when unresolved, else 0..=11 (C = 0)
    pub key_note: i8,
    /// 0 major, 1 minor
    pub key_scale: i8,
    pub key_confidence: f32,
    pub error_code: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HarmoniaStyleResult {
    pub count: i32,
    pub indices: [i32; STYLE_RESULT_CAPACITY],
    pub confidences: [f32; STYLE_RESULT_CAPACITY],
    pub error_code: i32,
}

impl HarmoniaAnalysisResult {
    fn failed(code: ErrorCode) -> Self {
        Self {
            key_note: -1,
            error_code: code.as_i32(),
            ..Self::default()
        }
    }
}

impl From<Result<RhythmKeyReport>> for HarmoniaAnalysisResult {
    fn from(result: Result<RhythmKeyReport>) -> Self {
        match result {
            Ok(report) => Self {
                bpm: report.bpm,
                bpm_confidence: report.bpm_confidence,
                key_note: report.key.note_index(),
                key_scale: report.key.scale.as_i8(),
                key_confidence: report.key_confidence,
                error_code: ErrorCode::Success.as_i32(),
            },
            Err(e) => Self::failed(e.code()),
        }
    }
}

impl HarmoniaStyleResult {
    fn failed(code: ErrorCode) -> Self {
        Self {
            error_code: code.as_i32(),
            ..Self::default()
        }
    }
}

impl From<Result<StyleReport>> for HarmoniaStyleResult {
    fn from(result: Result<StyleReport>) -> Self {
        match result {
            Ok(report) => {
                let mut out = Self::default();
                for (i, class) in report.classes.iter().take(STYLE_RESULT_CAPACITY).enumerate() {
                    out.indices[i] = class.index as i32;
                    out.confidences[i] = class.score;
                    out.count += 1;
                }
                out
            }
            Err(e) => Self::failed(e.code()),
        }
    }
}

/// Create a cancellation token. Release it with `harmonia_cancel_token_destroy`.
#[no_mangle]
pub extern "C" fn harmonia_cancel_token_create() -> *mut CancellationToken {
    Box::into_raw(Box::new(CancellationToken::new()))
}

/// Signal cancellation. Safe from any thread while an analysis runs.
///
/// # Safety
/// `token` must be null or a live pointer from `harmonia_cancel_token_create`.
#[no_mangle]
pub unsafe extern "C" fn harmonia_cancel_token_signal(token: *const CancellationToken) {
    // SAFETY: caller guarantees null or a live token
    if let Some(token) = unsafe { token.as_ref() } {
        token.cancel();
    }
}

/// # Safety
/// `token` must be null or a live pointer from `harmonia_cancel_token_create`.
#[no_mangle]
pub unsafe extern "C" fn harmonia_cancel_token_is_set(token: *const CancellationToken) -> bool {
    // SAFETY: caller guarantees null or a live token
    unsafe { token.as_ref() }.is_some_and(CancellationToken::is_cancelled)
}

/// Free a token. Only once no analysis still uses it.
///
/// # Safety
/// `token` must be null or a pointer from `harmonia_cancel_token_create` that
/// has not been destroyed yet.
#[no_mangle]
pub unsafe extern "C" fn harmonia_cancel_token_destroy(token: *mut CancellationToken) {
    if !token.is_null() {
        // SAFETY: pointer came from Box::into_raw and is destroyed once
        drop(unsafe { Box::from_raw(token) });
    }
}

/// Initialize the analysis runtime.
///
/// `config_path` may be null for built-in defaults. Returns 0 on success and
/// 3 when the configuration cannot be read or is invalid, including a path
/// that is not UTF-8 and a `top_k` larger than [`STYLE_RESULT_CAPACITY`].
/// Re-initializing replaces the previous runtime.
///
/// # Safety
/// `config_path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn harmonia_init(config_path: *const c_char) -> i32 {
    // SAFETY: forwarded caller guarantee
    let Some(settings) = (unsafe { init_settings(config_path) }) else {
        return ErrorCode::Analysis.as_i32();
    };

    let runtime = match Runtime::init(settings) {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("harmonia_init: {:#}", e);
            return ErrorCode::Analysis.as_i32();
        }
    };

    match RUNTIME.write() {
        Ok(mut slot) => {
            if let Some(previous) = slot.replace(runtime) {
                previous.shutdown();
            }
            ErrorCode::Success.as_i32()
        }
        Err(_) => {
            log::error!("harmonia_init: runtime lock poisoned");
            ErrorCode::Analysis.as_i32()
        }
    }
}

/// Tear down the runtime. No analysis may be in flight.
#[no_mangle]
pub extern "C" fn harmonia_shutdown() {
    if let Ok(mut slot) = RUNTIME.write() {
        if let Some(runtime) = slot.take() {
            runtime.shutdown();
        }
    }
}

/// Tempo and key analysis of one file.
///
/// # Safety
/// `path` must be null or a valid NUL-terminated string; `token` must be null
/// or a live token pointer. A null token means the request cannot be cancelled.
#[no_mangle]
pub unsafe extern "C" fn harmonia_analyze(
    path: *const c_char,
    token: *const CancellationToken,
) -> HarmoniaAnalysisResult {
    // SAFETY: forwarded caller guarantees
    let (path, token) = unsafe { (path_arg(path), token_arg(token)) };

    let Some(analyzer) = current_analyzer() else {
        return HarmoniaAnalysisResult::failed(ErrorCode::Analysis);
    };
    let Some(path) = path else {
        log::error!("harmonia_analyze: missing or non-UTF-8 path");
        return HarmoniaAnalysisResult::failed(ErrorCode::Decode);
    };

    guarded(|| analyzer.analyze_rhythm_and_key(&path, &token)).into()
}

/// Style classification of one file with the model at `model_path`.
///
/// # Safety
/// `audio_path` and `model_path` must be null or valid NUL-terminated
/// strings; `token` must be null or a live token pointer.
#[no_mangle]
pub unsafe extern "C" fn harmonia_classify_style(
    audio_path: *const c_char,
    model_path: *const c_char,
    token: *const CancellationToken,
) -> HarmoniaStyleResult {
    // SAFETY: forwarded caller guarantees
    let (audio_path, model_path, token) =
        unsafe { (path_arg(audio_path), path_arg(model_path), token_arg(token)) };

    let Some(analyzer) = current_analyzer() else {
        return HarmoniaStyleResult::failed(ErrorCode::Analysis);
    };
    let Some(audio_path) = audio_path else {
        log::error!("harmonia_classify_style: missing or non-UTF-8 audio path");
        return HarmoniaStyleResult::failed(ErrorCode::Decode);
    };
    let Some(model_path) = model_path else {
        log::error!("harmonia_classify_style: missing or non-UTF-8 model path");
        return HarmoniaStyleResult::failed(ErrorCode::Model);
    };

    guarded(|| analyzer.analyze_style(&audio_path, &model_path, &token)).into()
}

/// Settings for `harmonia_init`, or `None` (already logged) when unusable.
///
/// # Safety
/// `config_path` must be null or a valid NUL-terminated string.
unsafe fn init_settings(config_path: *const c_char) -> Option<AnalysisSettings> {
    let settings = if config_path.is_null() {
        AnalysisSettings::default()
    } else {
        // SAFETY: forwarded caller guarantee
        let Some(path) = (unsafe { path_arg(config_path) }) else {
            log::error!("harmonia_init: config path is not valid UTF-8");
            return None;
        };
        match load_config(&path) {
            Some(cfg) => cfg.settings(),
            None => {
                log::error!("harmonia_init: cannot load config {}", path.display());
                return None;
            }
        }
    };

    if settings.top_k > STYLE_RESULT_CAPACITY {
        log::error!(
            "harmonia_init: top_k {} exceeds the C result capacity of {}",
            settings.top_k,
            STYLE_RESULT_CAPACITY
        );
        return None;
    }
    Some(settings)
}

fn current_analyzer() -> Option<Analyzer> {
    let analyzer = RUNTIME
        .read()
        .ok()
        .and_then(|slot| slot.as_ref().map(Runtime::analyzer));
    if analyzer.is_none() {
        log::error!("analysis requested before harmonia_init");
    }
    analyzer
}

/// Keep panics from unwinding into the host; they surface as analysis errors.
fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        Err(AnalysisError::Analysis("internal panic during analysis".to_string()))
    })
}

/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn path_arg(ptr: *const c_char) -> Option<PathBuf> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per caller contract
    let s = unsafe { CStr::from_ptr(ptr) }.to_str().ok()?;
    Some(PathBuf::from(s))
}

/// A clone sharing the caller's flag, or a fresh never-signalled token.
///
/// # Safety
/// `ptr` must be null or a live token pointer.
unsafe fn token_arg(ptr: *const CancellationToken) -> CancellationToken {
    // SAFETY: per caller contract
    unsafe { ptr.as_ref() }.cloned().unwrap_or_default()
}
