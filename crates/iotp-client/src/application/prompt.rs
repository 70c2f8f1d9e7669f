//! The question-and-answer dialog that turns typed lines into an action.
//!
//! The dialog asks, in order:
//!
//! 1. Device type (only kinds the home actually has are accepted).
//! 2. Device number within that kind.
//! 3. Operation, from the kind's operation table.
//! 4. The operation's arguments, comma separated, if it takes any.
//!
//! Every question accepts `t` to terminate the session instead, and repeats
//! itself after an illegal answer.  The dialog only reads through a
//! `next_line` callback and writes to any `Write`, so it runs the same
//! against a terminal or a test script.

use std::io::{self, Write};

use iotp_core::devices::{DeviceKind, Operation};
use iotp_core::{DeviceType, Home};

use crate::application::ActionRequest;

/// Result of one question.
enum Answer<T> {
    Value(T),
    Terminate,
    /// No more input, or the dialog was cancelled.
    Abort,
}

/// Runs the whole dialog against `home`.
///
/// Returns `Ok(None)` if `next_line` runs dry before an action is complete.
///
/// # Errors
///
/// Returns an I/O error only if writing to `out` fails.
pub fn collect_action<L, W>(
    home: &Home,
    mut next_line: L,
    out: &mut W,
) -> io::Result<Option<ActionRequest>>
where
    L: FnMut() -> Option<String>,
    W: Write,
{
    writeln!(out, "{home}")?;

    let device_type = match ask(out, &mut next_line, &type_menu(), |s| parse_type(home, s))? {
        Answer::Value(t) => t,
        Answer::Terminate => return Ok(Some(ActionRequest::Terminate)),
        Answer::Abort => return Ok(None),
    };

    let devices = home.devices(device_type);
    let device_index = match ask(out, &mut next_line, &device_menu(home, device_type), |s| {
        parse_index(devices.len(), s)
    })? {
        Answer::Value(i) => i,
        Answer::Terminate => return Ok(Some(ActionRequest::Terminate)),
        Answer::Abort => return Ok(None),
    };
    if let Some(device) = home.device(device_type, device_index) {
        writeln!(out, "selected device: {device}")?;
    }

    let kind = device_type.kind();
    let operation = match ask(out, &mut next_line, &operation_menu(kind), |s| {
        parse_operation(kind, s)
    })? {
        Answer::Value(op) => op,
        Answer::Terminate => return Ok(Some(ActionRequest::Terminate)),
        Answer::Abort => return Ok(None),
    };

    let params = if operation.params.is_empty() {
        writeln!(out, "No parameters for operation: {}", operation.name)?;
        Vec::new()
    } else {
        match ask(out, &mut next_line, &params_menu(operation), |s| {
            parse_params(operation.params.len(), s)
        })? {
            Answer::Value(p) => p,
            Answer::Terminate => return Ok(Some(ActionRequest::Terminate)),
            Answer::Abort => return Ok(None),
        }
    };

    Ok(Some(ActionRequest::act(
        device_type,
        device_index,
        operation.opcode,
        params,
    )))
}

/// Repeats `menu` until `parse` accepts an answer.
fn ask<T, L, W, P>(out: &mut W, next_line: &mut L, menu: &str, parse: P) -> io::Result<Answer<T>>
where
    L: FnMut() -> Option<String>,
    W: Write,
    P: Fn(&str) -> Result<T, String>,
{
    loop {
        writeln!(out, "{menu}")?;
        out.flush()?;
        let Some(line) = next_line() else {
            return Ok(Answer::Abort);
        };
        let line = line.trim();
        if line.eq_ignore_ascii_case("t") {
            return Ok(Answer::Terminate);
        }
        match parse(line) {
            Ok(value) => return Ok(Answer::Value(value)),
            Err(reason) => writeln!(out, "Illegal selection, try again: {reason}")?,
        }
    }
}

// ── Menus ─────────────────────────────────────────────────────────────────────

fn type_menu() -> String {
    let mut menu = String::from("Select device type or press T to terminate:\n");
    for device_type in DeviceType::ALL {
        menu.push_str(&format!("[{}] {}  ", device_type.code(), device_type));
    }
    menu.trim_end().to_string()
}

fn device_menu(home: &Home, device_type: DeviceType) -> String {
    let mut menu = String::from("Select device or press T to terminate:");
    for (index, device) in home.devices(device_type).iter().enumerate() {
        menu.push_str(&format!("\n[{index}] {}", device.name()));
    }
    menu
}

fn operation_menu(kind: &DeviceKind) -> String {
    let mut menu = String::from("Select operation or press T to terminate:");
    for op in kind.operations {
        menu.push_str(&format!("\n[{}] {}", op.opcode, op.name));
    }
    menu
}

fn params_menu(operation: &Operation) -> String {
    let separated = if operation.params.len() > 1 {
        " (separated by commas)"
    } else {
        ""
    };
    format!(
        "Input {}{separated} or press T to terminate:",
        operation.params.join(", ")
    )
}

// ── Parsers ───────────────────────────────────────────────────────────────────

fn parse_type(home: &Home, input: &str) -> Result<DeviceType, String> {
    let code: u8 = input.parse().map_err(|_| format!("{input:?} is not a number"))?;
    let device_type =
        DeviceType::from_code(code).ok_or("selected device code not in range")?;
    if home.devices(device_type).is_empty() {
        return Err("no devices of selected type".to_string());
    }
    Ok(device_type)
}

fn parse_index(count: usize, input: &str) -> Result<u8, String> {
    let index: u8 = input.parse().map_err(|_| format!("{input:?} is not a number"))?;
    if usize::from(index) >= count {
        return Err("selected device number not in range".to_string());
    }
    Ok(index)
}

fn parse_operation(kind: &'static DeviceKind, input: &str) -> Result<&'static Operation, String> {
    let opcode: u8 = input.parse().map_err(|_| format!("{input:?} is not a number"))?;
    kind.operation(opcode)
        .ok_or_else(|| "selected opcode not in range".to_string())
}

fn parse_params(expected: usize, input: &str) -> Result<Vec<u8>, String> {
    let parts: Vec<&str> = input.split(',').map(str::trim).collect();
    if parts.len() != expected {
        return Err("unexpected number of parameters".to_string());
    }
    parts
        .iter()
        .map(|p| p.parse::<u8>().map_err(|_| format!("{p:?} is not a value in 0-255")))
        .collect()
}
