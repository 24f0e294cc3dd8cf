use keyflight_link::{read_configuration, ModuleSummary};
use serde::Serialize;

use crate::cmd::{connect, parse_timeout, DumpArgs};
use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct DumpOutput<'a> {
    port: &'a str,
    modules: &'a [ModuleSummary],
}

pub fn run(args: DumpArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    let (session, _identity, _logs) = connect(&args.port, &args.connection)?;
    let modules = read_configuration(&session, timeout)
        .map_err(|err| link_error("configuration read-back failed", err))?;
    session.disconnect();

    match format {
        OutputFormat::Json => print_json(&DumpOutput {
            port: &args.port,
            modules: &modules,
        }),
        OutputFormat::Table => print_table(
            &["ID", "TYPE", "PIN", "PIN2"],
            modules
                .iter()
                .map(|m| {
                    vec![
                        m.id.to_string(),
                        m.kind.clone(),
                        m.pin.to_string(),
                        m.pin2.to_string(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty => {
            if modules.is_empty() {
                println!("no modules configured");
            }
            for m in &modules {
                println!("#{} {} pin={} pin2={}", m.id, m.kind, m.pin, m.pin2);
            }
        }
    }

    Ok(SUCCESS)
}
