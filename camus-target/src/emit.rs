// Writers for the three output artifacts spec §6 defines: the `table_add`
// command file, the JSON document, and the multicast-group file. All take
// `impl Write`, the "generic byte sink" spec.md specifies -- formatting a
// runtime's exact on-wire syntax is explicitly out of scope, so these
// writers target the one textual/JSON convention spec §6 pins down.

use std::io::{self, Write};

use camus::value::Const;
use serde_json::{json, Value};

use crate::lower::{TargetAction, TargetMatch, TargetPipeline, ACTIONS_TABLE_NAME};

/// `Number`/`Mac` as unsigned decimal, `Ipv4`/`Ipv6` as unsigned decimal
/// assembled from their limbs, `String` right-padded with spaces to
/// `width_bits/8` bytes and read back as a big-endian integer. Spec §4.3
/// "Value encoding".
pub fn str_of_value(c: &Const, width_bits: u16) -> String {
    match c {
        Const::Number(n) => n.to_string(),
        Const::Mac(m) => m.to_string(),
        Const::Ipv4(a) => a.to_string(),
        Const::Ipv6(a, b, c, d) => {
            let v = ((*a as u128) << 96) | ((*b as u128) << 64) | ((*c as u128) << 32) | (*d as u128);
            v.to_string()
        }
        Const::String(s) => {
            let nbytes = (width_bits / 8) as usize;
            let mut bytes = s.as_bytes().to_vec();
            if bytes.len() < nbytes {
                bytes.resize(nbytes, b' ');
            }
            bytes_to_decimal(&bytes)
        }
    }
}

/// Converts a big-endian byte string into its unsigned decimal
/// representation via repeated long division -- needed because a padded
/// `String` value can exceed any fixed machine integer width.
fn bytes_to_decimal(bytes: &[u8]) -> String {
    if bytes.iter().all(|b| *b == 0) {
        return "0".to_string();
    }
    let mut digits = bytes.to_vec();
    let mut out = Vec::new();
    while digits.iter().any(|b| *b != 0) {
        let mut rem: u32 = 0;
        for d in digits.iter_mut() {
            let cur = (rem << 8) | (*d as u32);
            *d = (cur / 10) as u8;
            rem = cur % 10;
        }
        out.push(b'0' + rem as u8);
    }
    out.reverse();
    String::from_utf8(out).expect("ASCII digits only")
}

/// JSON's match-field values are plain numbers in spec §6's examples
/// (`[1024, 1999]`), not decimal strings. Values that fit in an `i64`
/// round-trip as JSON numbers; anything wider (an IPv6 address, a long
/// padded string) falls back to its decimal string since `serde_json`
/// without the `arbitrary_precision` feature can't losslessly carry a
/// 128-bit integer as a JSON number.
fn const_to_json(c: &Const, width_bits: u16) -> Value {
    let decimal = str_of_value(c, width_bits);
    match decimal.parse::<i64>() {
        Ok(n) => json!(n),
        Err(_) => json!(decimal),
    }
}

fn hex_bound(v: i128, width_bits: u16) -> String {
    let nbytes = ((width_bits as usize) + 7) / 8;
    let nbytes = nbytes.max(1);
    format!("0x{:0width$x}", v.max(0), width = nbytes * 2)
}

fn max_unsigned(width_bits: u16) -> i128 {
    if width_bits == 0 || width_bits >= 127 {
        i128::MAX
    } else {
        (1i128 << width_bits) - 1
    }
}

/// The `<match> …` portion of a `table_add` line for a transition-table
/// entry, given the field's width for range-endpoint formatting.
///
/// `Lt`/`Gt` are rendered with a hex-literal open bound (spec §6: "Lt
/// `0x00-><hi>`", "Gt `<lo>-><0x…ff>`"); a genuine two-sided `Range` is
/// always decimal on both ends, even when its low bound happens to be
/// the field's domain minimum -- that's a different shape from `Lt`, not
/// a coincidentally-open one, and `TargetMatch` keeps them distinct so
/// this doesn't have to guess from the bound value.
fn match_text(m: &TargetMatch, width_bits: u16) -> String {
    match m {
        TargetMatch::StateOnly => String::new(),
        TargetMatch::Exact(c) => str_of_value(c, width_bits),
        TargetMatch::Lt(c) => {
            let x = c.to_int().expect("Lt is only ever built over a Number");
            format!(
                "{}->{}",
                hex_bound(0, width_bits),
                str_of_value(&Const::Number(x - 1), width_bits)
            )
        }
        TargetMatch::Gt(c) => {
            let x = c.to_int().expect("Gt is only ever built over a Number");
            format!(
                "{}->{}",
                str_of_value(&Const::Number(x + 1), width_bits),
                hex_bound(max_unsigned(width_bits), width_bits)
            )
        }
        TargetMatch::Range(lo, hi) => {
            format!("{}->{}", str_of_value(lo, width_bits), str_of_value(hi, width_bits))
        }
        TargetMatch::Lpm(addr, len) => {
            format!("{}/{}", str_of_value(addr, width_bits), str_of_value(len, width_bits))
        }
    }
}

fn action_text(a: &TargetAction) -> (String, String) {
    match a {
        TargetAction::SetNextState(s) => ("set_next_state".to_string(), s.to_string()),
        TargetAction::SetEgressPort(p) => ("set_egress_port".to_string(), p.to_string()),
        TargetAction::SetMgid(m) => ("set_mgid".to_string(), m.to_string()),
        TargetAction::Call(name, args) => (
            name.clone(),
            args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", "),
        ),
        TargetAction::Drop => ("query_drop".to_string(), String::new()),
    }
}

pub fn write_commands(pipeline: &TargetPipeline, w: &mut impl Write) -> io::Result<()> {
    for table in &pipeline.tables {
        let width = table.field.as_ref().map(|f| f.width_bits).unwrap_or(16);
        for entry in &table.entries {
            let (action, args) = action_text(&entry.action);
            let mut matches = vec![entry.state.to_string()];
            let m = match_text(&entry.matc, width);
            if !m.is_empty() {
                matches.push(m);
            }
            write!(w, "table_add {} {} {}", table.name, action, matches.join(" "))?;
            write!(w, " => {args}")?;
            if let Some(p) = entry.priority {
                write!(w, " {p}")?;
            }
            writeln!(w)?;
        }
    }
    Ok(())
}

pub fn write_mcast_groups(pipeline: &TargetPipeline, w: &mut impl Write) -> io::Result<()> {
    for (mgid, ports) in &pipeline.mgids {
        let ports_str = ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(" ");
        writeln!(w, "{mgid}: {ports_str}")?;
    }
    Ok(())
}

fn action_params_json(a: &TargetAction) -> Value {
    match a {
        TargetAction::SetNextState(s) => json!({ "next_state": s }),
        TargetAction::SetEgressPort(p) => json!({ "port": p }),
        TargetAction::SetMgid(m) => json!({ "mgid": m }),
        TargetAction::Call(_, args) => {
            let mut params = serde_json::Map::new();
            for (i, a) in args.iter().enumerate() {
                params.insert(format!("arg{i}"), json!(a));
            }
            Value::Object(params)
        }
        TargetAction::Drop => json!({}),
    }
}

fn action_name(a: &TargetAction) -> String {
    match a {
        TargetAction::SetNextState(_) => "Camus.set_next_state".to_string(),
        TargetAction::SetEgressPort(_) => "Camus.set_egress_port".to_string(),
        TargetAction::SetMgid(_) => "Camus.set_mgid".to_string(),
        TargetAction::Call(name, _) => format!("Camus.{name}"),
        TargetAction::Drop => "Camus.query_drop".to_string(),
    }
}

pub fn write_json(pipeline: &TargetPipeline, w: &mut impl Write) -> io::Result<()> {
    let mut entries = Vec::new();
    for table in &pipeline.tables {
        let width = table.field.as_ref().map(|f| f.width_bits).unwrap_or(16);
        for entry in &table.entries {
            let mut fields = serde_json::Map::new();
            fields.insert("meta.query.state".to_string(), json!([entry.state]));
            if let Some(field) = &table.field {
                let key = format!("hdr.{}.{}", field.header, field.field);
                let value = match &entry.matc {
                    TargetMatch::StateOnly => None,
                    TargetMatch::Exact(c) => Some(json!([const_to_json(c, width)])),
                    TargetMatch::Lt(c) => {
                        let x = c.to_int().expect("Lt is only ever built over a Number");
                        Some(json!([
                            const_to_json(&Const::Number(0), width),
                            const_to_json(&Const::Number(x - 1), width)
                        ]))
                    }
                    TargetMatch::Gt(c) => {
                        let x = c.to_int().expect("Gt is only ever built over a Number");
                        Some(json!([
                            const_to_json(&Const::Number(x + 1), width),
                            const_to_json(&Const::Number(max_unsigned(width)), width)
                        ]))
                    }
                    TargetMatch::Range(lo, hi) => {
                        Some(json!([const_to_json(lo, width), const_to_json(hi, width)]))
                    }
                    TargetMatch::Lpm(addr, len) => {
                        Some(json!([const_to_json(addr, width), const_to_json(len, width)]))
                    }
                };
                if let Some(value) = value {
                    fields.insert(key, value);
                }
            }

            let mut obj = serde_json::Map::new();
            obj.insert(
                "table_name".to_string(),
                json!(format!("Camus.{}", table.name)),
            );
            obj.insert("match_fields".to_string(), Value::Object(fields));
            obj.insert("action_name".to_string(), json!(action_name(&entry.action)));
            obj.insert("action_params".to_string(), action_params_json(&entry.action));
            if let Some(p) = entry.priority {
                obj.insert("priority".to_string(), json!(p));
            }
            entries.push(Value::Object(obj));
        }
    }
    entries.push(Value::Null);
    serde_json::to_writer_pretty(&mut *w, &Value::Array(entries))?;
    writeln!(w)?;
    Ok(())
}
