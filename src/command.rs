//! Newline-delimited control protocol read from stdin, intended for
//! scripted end-to-end testing. One command per line; one or more
//! response lines prefixed `CMD:OK:` or `CMD:ERR:`.

use crate::app::AppCore;
use crate::error::OsmError;

/// Parse and execute one command line, returning the response lines to
/// write back (without trailing newlines — the caller adds those).
pub fn dispatch(app: &mut AppCore, line: &str, now: i64) -> Vec<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some((name, rest)) = split_command(line) else {
        return vec![error_line(OsmError::Unknown, None)];
    };

    match name {
        "IDENTITY" => identity(app),
        "KEYGEN" => keygen(app),
        "ADD" => add_contact(app, rest, now),
        "ASSIGN" => assign(app, rest),
        "CREATE" => create(app, rest, now),
        "COMPLETE" => complete(app, rest),
        "DELETE" => delete(app, rest),
        "SEND" => send(app, rest, now),
        "RECV_COUNT" => recv_count(app, rest),
        "STATE" => state(app),
        _ => vec![error_line(OsmError::Unknown, None)],
    }
}

/// Split `NAME` or `NAME:rest` into `(NAME, rest)`. `rest` is empty for a
/// bare command like `STATE`.
fn split_command(line: &str) -> Option<(&str, &str)> {
    if line.is_empty() {
        return None;
    }
    match line.split_once(':') {
        Some((name, rest)) => Some((name, rest)),
        None => Some((line, "")),
    }
}

fn ok_line(body: &str) -> String {
    format!("CMD:OK:{body}")
}

fn error_line(err: OsmError, detail: Option<&str>) -> String {
    let reason = match err {
        OsmError::AuthFailed => "auth_failed",
        OsmError::StorageFull => "storage_full",
        OsmError::StorageIo(_) => "storage_io",
        OsmError::CapacityExceeded => "capacity_exceeded",
        OsmError::Malformed(_) => "malformed",
        OsmError::NotEstablished => "not_established",
        OsmError::Unknown => "unknown_command",
    };
    match detail {
        Some(d) => format!("CMD:ERR:{reason}:{d}"),
        None => format!("CMD:ERR:{reason}"),
    }
}

fn identity(app: &mut AppCore) -> Vec<String> {
    if !app.identity().valid {
        return vec![error_line(OsmError::Malformed("no identity".into()), None)];
    }
    vec![ok_line(&app.identity().pubkey_b64())]
}

fn keygen(app: &mut AppCore) -> Vec<String> {
    match app.keygen() {
        Ok(()) => vec![ok_line(&app.identity().pubkey_b64())],
        Err(e) => vec![error_line(e, None)],
    }
}

fn add_contact(app: &mut AppCore, rest: &str, now: i64) -> Vec<String> {
    match app.add_contact(rest, now) {
        Ok(id) => vec![ok_line(&id.to_string())],
        Err(e) => vec![error_line(e, None)],
    }
}

fn assign(app: &mut AppCore, rest: &str) -> Vec<String> {
    let Some(key) = app.pending_keys().iter().next().map(|k| k.pubkey_b64.clone()) else {
        return vec![error_line(OsmError::Malformed("no pending key".into()), None)];
    };
    match app.assign_pending(rest, &key) {
        Ok(()) => vec![ok_line(rest)],
        Err(e) => vec![error_line(e, None)],
    }
}

fn create(app: &mut AppCore, rest: &str, now: i64) -> Vec<String> {
    let Some(key) = app.pending_keys().iter().next().map(|k| k.pubkey_b64.clone()) else {
        return vec![error_line(OsmError::Malformed("no pending key".into()), None)];
    };
    match app.create_from_pending(rest, &key, now) {
        Ok(id) => vec![ok_line(&id.to_string())],
        Err(e) => vec![error_line(e, None)],
    }
}

fn complete(app: &mut AppCore, rest: &str) -> Vec<String> {
    match app.complete_kex(rest) {
        Ok(()) => vec![ok_line(rest)],
        Err(e) => vec![error_line(e, None)],
    }
}

fn delete(app: &mut AppCore, rest: &str) -> Vec<String> {
    match app.delete_contact(rest) {
        Ok(()) => vec![ok_line(rest)],
        Err(e) => vec![error_line(e, None)],
    }
}

fn send(app: &mut AppCore, rest: &str, now: i64) -> Vec<String> {
    let Some((name, plaintext)) = rest.split_once(':') else {
        return vec![error_line(OsmError::Unknown, None)];
    };
    match app.send_message(name, plaintext, now) {
        Ok(()) => vec![ok_line(name)],
        Err(e) => vec![error_line(e, None)],
    }
}

fn recv_count(app: &mut AppCore, rest: &str) -> Vec<String> {
    let Some(contact) = app.contacts().find_by_name(rest) else {
        return vec![error_line(OsmError::Malformed(format!("no contact named {rest}")), None)];
    };
    vec![ok_line(&contact.unread_count.to_string())]
}

fn state(app: &mut AppCore) -> Vec<String> {
    vec![ok_line(&format!(
        "contacts={} messages={} pending_keys={} outbox={} storage_error={} storage_full={}",
        app.contacts().len(),
        app.messages().len(),
        app.pending_keys().len(),
        app.outbox().len(),
        app.storage_error(),
        app.storage_full(),
    ))]
}
