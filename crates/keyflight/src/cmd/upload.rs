use keyflight_link::{validate_upload, InputKind, InputModule, UploadConfig, UploadSummary};
use serde::Serialize;

use crate::cmd::{connect, parse_duration, UploadArgs};
use crate::exit::{link_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct UploadOutput<'a> {
    port: &'a str,
    #[serde(flatten)]
    summary: UploadSummary,
}

pub fn run(args: UploadArgs, format: OutputFormat) -> CliResult<i32> {
    let modules = args
        .modules
        .iter()
        .map(String::as_str)
        .map(parse_module)
        .collect::<CliResult<Vec<_>>>()?;
    validate_upload(&modules).map_err(|err| link_error("invalid configuration", err))?;

    let pacing = UploadConfig {
        reset_settle: parse_duration(&args.reset_settle)?,
        command_gap: parse_duration(&args.command_gap)?,
    };

    let (session, _identity, _logs) = connect(&args.port, &args.connection)?;
    let summary = session
        .upload(&modules, &pacing)
        .map_err(|err| link_error("upload failed", err))?;
    session.disconnect();

    match format {
        OutputFormat::Json => print_json(&UploadOutput {
            port: &args.port,
            summary,
        }),
        OutputFormat::Table => print_table(
            &["PORT", "MODULES", "COMMANDS"],
            vec![vec![
                args.port.clone(),
                summary.modules.to_string(),
                summary.commands.to_string(),
            ]],
        ),
        OutputFormat::Pretty => println!(
            "uploaded {} modules ({} commands) to {}",
            summary.modules, summary.commands, args.port
        ),
    }

    Ok(SUCCESS)
}

/// Parse `id:kind:pin[:pin2]:key[:key2]`.
///
/// Encoders must carry `pin2`; every other kind must not.
pub fn parse_module(spec: &str) -> CliResult<InputModule> {
    let usage = |detail: &str| {
        CliError::new(
            USAGE,
            format!("invalid --module '{spec}': {detail} (expected id:kind:pin[:pin2]:key[:key2])"),
        )
    };

    let fields: Vec<&str> = spec.split(':').map(str::trim).collect();
    if fields.len() < 4 {
        return Err(usage("too few fields"));
    }

    let id: u32 = fields[0].parse().map_err(|_| usage("id must be a number"))?;
    let kind: InputKind = fields[1]
        .parse()
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid --module '{spec}': {err}")))?;
    let pin: u8 = fields[2].parse().map_err(|_| usage("pin must be a number"))?;

    let mut rest = &fields[3..];
    let mut module_pin2 = None;
    if kind.uses_pin2() {
        let (pin2, tail) = rest.split_first().ok_or_else(|| usage("encoder needs pin2"))?;
        module_pin2 = Some(pin2.parse::<u8>().map_err(|_| usage("pin2 must be a number"))?);
        rest = tail;
    }

    let (key, key2) = match rest {
        [key] => (*key, None),
        [key, key2] => (*key, Some(*key2)),
        [] => return Err(usage("missing key command")),
        _ => return Err(usage("too many fields")),
    };

    let mut module = InputModule::new(id, kind, pin, key);
    if let Some(pin2) = module_pin2 {
        module = module.with_pin2(pin2);
    }
    if let Some(key2) = key2 {
        module = module.with_key2(key2);
    }
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_button() {
        let module = parse_module("1:button:2:CTRL+F").expect("valid spec");
        assert_eq!(module.id, 1);
        assert_eq!(module.kind, InputKind::Button);
        assert_eq!(module.pin, 2);
        assert_eq!(module.key_command, "CTRL+F");
        assert!(module.key_command2.is_empty());
    }

    #[test]
    fn parses_encoder_with_pin2_and_key2() {
        let module = parse_module("7:ENCODER:5:6:VOL_UP:VOL_DOWN").expect("valid spec");
        assert_eq!(module.kind, InputKind::Encoder);
        assert_eq!((module.pin, module.pin2), (5, 6));
        assert_eq!(module.key_command2, "VOL_DOWN");
    }

    #[test]
    fn parses_switch_with_off_key() {
        let module = parse_module("3:switch:8:LIGHTS_ON:LIGHTS_OFF").expect("valid spec");
        assert_eq!(module.pin2, 0);
        assert_eq!(module.key_command, "LIGHTS_ON");
        assert_eq!(module.key_command2, "LIGHTS_OFF");
    }

    #[test]
    fn rejects_malformed_specs() {
        assert_eq!(parse_module("1:button").unwrap_err().code, USAGE);
        assert_eq!(parse_module("x:button:2:A").unwrap_err().code, USAGE);
        assert_eq!(parse_module("1:encoder:5:A").unwrap_err().code, USAGE);
        assert_eq!(parse_module("1:button:2:A:B:C").unwrap_err().code, USAGE);
        assert_eq!(parse_module("1:slider:2:A").unwrap_err().code, DATA_INVALID);
    }
}
