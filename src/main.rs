use anyhow::Result;
use argh::FromArgs;
use cli_shell::command::Usage;
use cli_shell::config::ShellConfig;
use cli_shell::{Shell, logging};
use log::LevelFilter;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(FromArgs)]
/// Interactive command shell with in-process pipelines.
struct Args {
    #[argh(option)]
    /// configuration file merged over the built-in defaults.
    config: Option<PathBuf>,

    #[argh(switch, short = 'v')]
    /// log everything at debug level.
    verbose: bool,

    #[argh(option, short = 'c')]
    /// run this line and exit with its code instead of starting the prompt.
    command: Option<String>,
}

/// Sample commands showing how stages talk through the pipeline.
fn register_demo_commands(shell: &mut Shell) {
    shell.insert_fn("pipe0", Usage::new("pipeline test: produce a line"), |session, _| {
        session.print("-pipe0----------\n")?;
        session.print("this is a line\n")?;
        Ok(0)
    });
    shell.insert_fn("pipe1", Usage::new("pipeline test: forward two words"), |session, _| {
        session.print("-pipe1----------\n")?;
        let mut total = 0;
        for _ in 0..2 {
            let word = session.read_token()?.unwrap_or_default();
            session.print(&format!("{word}\n"))?;
            total += 1;
        }
        session.print(&format!("total: {total}\n"))?;
        Ok(0)
    });
    shell.insert_fn("pipe2", Usage::new("pipeline test: quote every word"), |session, _| {
        session.print("-pipe2----------\n")?;
        let mut total = 0;
        while let Some(word) = session.read_token()? {
            session.print(&format!("{word:?}\n"))?;
            total += 1;
        }
        session.print(&format!("total: {total}\n"))?;
        Ok(0)
    });
    shell.insert_fn("ret0", Usage::new("operator test: return 0"), |session, _| {
        session.print("return 0;\n")?;
        Ok(0)
    });
    shell.insert_fn("ret1", Usage::new("operator test: return 1"), |session, _| {
        session.print("return 1;\n")?;
        Ok(1)
    });
}

fn run(args: Args) -> Result<i32> {
    let config = ShellConfig::load(args.config.as_deref())?;
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        config.log_level()?
    };
    logging::init(level);

    let mut shell = Shell::new(cli_shell::builtin::registry(), config);
    register_demo_commands(&mut shell);

    match args.command {
        Some(line) => match shell.run_line(&line) {
            Ok(flow) => Ok(flow.code()),
            Err(err) => {
                eprintln!("{err}");
                Ok(2)
            }
        },
        None => {
            let code = shell.repl()?;
            println!("shell returned with code: {code}");
            Ok(code)
        }
    }
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();
    match run(args) {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            eprintln!("cli_shell: {err:#}");
            ExitCode::FAILURE
        }
    }
}
