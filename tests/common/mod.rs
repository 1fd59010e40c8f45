//! Shared fixtures for integration tests: a function library mirroring a
//! small user code base, plus sequence helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use seqloom::registry::{FunctionError, FunctionLibrary, LibraryModule};
use seqloom::sequence::Sequence;
use seqloom::types::Kwargs;
use seqloom::wrappers::{NodeWrapper, WrapperError};
use serde_json::{json, Value};
use std::io::Write;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Node functions
// ---------------------------------------------------------------------------

pub async fn return_hello_world(_kwargs: Kwargs) -> Result<Value, FunctionError> {
    Ok(json!("Hello world!"))
}

/// Sleeps, then returns the current UTC timestamp in microseconds.
pub async fn return_timestamp_after_sleep(kwargs: Kwargs) -> Result<Value, FunctionError> {
    let seconds = float_arg(&kwargs, "sleep_time")?;
    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    Ok(json!(chrono::Utc::now().timestamp_micros()))
}

pub async fn sleep_seconds(kwargs: Kwargs) -> Result<Value, FunctionError> {
    let seconds = float_arg(&kwargs, "seconds")?;
    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    Ok(Value::Null)
}

/// Appends the rendered argument plus a newline to a file.
pub async fn write_arg_in_file(kwargs: Kwargs) -> Result<Value, FunctionError> {
    let file = str_value(&kwargs, "file")?;
    let arg = kwargs.get("arg").cloned().unwrap_or(Value::Null);
    let line = match arg {
        Value::String(s) => s,
        other => other.to_string(),
    };
    let mut handle = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(file)?;
    writeln!(handle, "{line}")?;
    Ok(Value::Null)
}

pub async fn return_arg(kwargs: Kwargs) -> Result<Value, FunctionError> {
    Ok(kwargs.get("arg").cloned().unwrap_or(Value::Null))
}

pub async fn fail_always(_kwargs: Kwargs) -> Result<Value, FunctionError> {
    Err("this function always fails".into())
}

pub async fn panic_now(_kwargs: Kwargs) -> Result<Value, FunctionError> {
    panic!("deliberate panic")
}

fn float_arg(kwargs: &Kwargs, name: &str) -> Result<f64, FunctionError> {
    kwargs
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("argument `{name}` must be a number").into())
}

fn str_value(kwargs: &Kwargs, name: &str) -> Result<String, FunctionError> {
    match kwargs.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(format!("argument `{name}` must be a string").into()),
    }
}

// ---------------------------------------------------------------------------
// Wrappers
// ---------------------------------------------------------------------------

pub struct WrapperSetFoo;

#[async_trait]
impl NodeWrapper for WrapperSetFoo {
    async fn pre(&mut self) -> Result<Value, WrapperError> {
        Ok(json!("foo"))
    }
}

pub struct WrapperToCaps {
    text: String,
}

#[async_trait]
impl NodeWrapper for WrapperToCaps {
    async fn pre(&mut self) -> Result<Value, WrapperError> {
        Ok(json!(self.text.to_uppercase()))
    }
}

pub struct WrapperWriteInFile {
    filepath: String,
}

#[async_trait]
impl NodeWrapper for WrapperWriteInFile {
    async fn post(&mut self) -> Result<(), WrapperError> {
        std::fs::write(&self.filepath, "egg")?;
        Ok(())
    }
}

pub struct WrapperExcPre;

#[async_trait]
impl NodeWrapper for WrapperExcPre {
    async fn pre(&mut self) -> Result<Value, WrapperError> {
        Err("pre failed on purpose".into())
    }
}

pub struct WrapperExcPost;

#[async_trait]
impl NodeWrapper for WrapperExcPost {
    async fn post(&mut self) -> Result<(), WrapperError> {
        Err("post failed on purpose".into())
    }
}

fn wrapper_str_arg(kwargs: &Kwargs, name: &str) -> Result<String, WrapperError> {
    match kwargs.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(format!("wrapper argument `{name}` must be a string").into()),
    }
}

// ---------------------------------------------------------------------------
// Library assembly
// ---------------------------------------------------------------------------

/// The full fixture library: one module of functions, one of wrappers.
pub fn library() -> FunctionLibrary {
    FunctionLibrary::new()
        .with_module(
            LibraryModule::new("functions")
                .function("return_hello_world", return_hello_world)
                .function("return_timestamp_after_sleep", return_timestamp_after_sleep)
                .function("sleep_seconds", sleep_seconds)
                .function("write_arg_in_file", write_arg_in_file)
                .function("return_arg", return_arg)
                .function("fail_always", fail_always)
                .function("panic_now", panic_now),
        )
        .with_module(
            LibraryModule::new("wrappers")
                .wrapper("WrapperSetFoo", |_| Ok(Box::new(WrapperSetFoo)))
                .wrapper("WrapperToCaps", |kwargs| {
                    let text = wrapper_str_arg(&kwargs, "text")?;
                    Ok(Box::new(WrapperToCaps { text }))
                })
                .wrapper("WrapperWriteInFile", |kwargs| {
                    let filepath = wrapper_str_arg(&kwargs, "filepath")?;
                    Ok(Box::new(WrapperWriteInFile { filepath }))
                })
                .wrapper("WrapperExcInit", |_| Err("init failed on purpose".into()))
                .wrapper("WrapperExcPre", |_| Ok(Box::new(WrapperExcPre)))
                .wrapper("WrapperExcPost", |_| Ok(Box::new(WrapperExcPost))),
        )
}

/// Parse a sequence from inline YAML, panicking on invalid fixtures.
pub fn sequence(yaml: &str) -> Sequence {
    Sequence::from_str(yaml).expect("fixture sequence must be valid")
}
