use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use clap::Parser;
use krm_functions::{
    FunctionKind, ResourceList,
    logging::{self, LOG_ENV, LoggingOptions},
    resource_list,
};
use snafu::{ResultExt, Snafu, ensure};
use strum::IntoEnumIterator;

const APP_NAME: &str = "krm-fn";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to read the input from stdin"))]
    ReadStdin { source: io::Error },

    #[snafu(display("failed to read {path:?}"))]
    ReadFile { source: io::Error, path: PathBuf },

    #[snafu(display("failed to parse the input"))]
    ParseInput { source: resource_list::Error },

    #[snafu(display("failed to parse function config {path:?}"))]
    ParseFunctionConfig { source: serde_yaml::Error, path: PathBuf },

    #[snafu(display("failed to write the output"))]
    SerializeOutput { source: resource_list::Error },

    #[snafu(display("failed to write the output to stdout"))]
    WriteStdout { source: io::Error },

    #[snafu(display("failed to write results to stderr"))]
    WriteStderr { source: io::Error },

    #[snafu(display("failed to write {path:?}"))]
    WriteFile { source: io::Error, path: PathBuf },

    #[snafu(display("{function} reported {errors} error(s)"))]
    FunctionFailed { function: FunctionKind, errors: usize },
}

#[derive(Debug, Parser)]
#[command(version, about = "Runs KRM functions over ResourceLists")]
enum Command {
    /// Run a function over a ResourceList or a stream of resources.
    Run(RunArguments),

    /// List the available functions.
    List,
}

#[derive(Debug, clap::Args)]
struct RunArguments {
    /// The function to run, see `krm-fn list`.
    function: FunctionKind,

    /// Read the input from FILE instead of stdin.
    #[arg(long, short, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Write the output to FILE instead of stdout.
    #[arg(long, short, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Use the function config in FILE, replacing the one in the input.
    #[arg(long, value_name = "FILE")]
    fn_config: Option<PathBuf>,

    #[command(flatten)]
    logging: LoggingOptions,
}

#[snafu::report]
fn main() -> Result<(), Error> {
    match Command::parse() {
        Command::Run(arguments) => {
            logging::initialize_logging(LOG_ENV, APP_NAME, &arguments.logging)
                .context(InitializeLoggingSnafu)?;
            run(&arguments)
        }
        Command::List => {
            let mut stdout = io::stdout().lock();
            for function in FunctionKind::iter() {
                writeln!(stdout, "{function}").context(WriteStdoutSnafu)?;
            }
            Ok(())
        }
    }
}

fn run(arguments: &RunArguments) -> Result<(), Error> {
    let input = match &arguments.input {
        Some(path) => read(path)?,
        None => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .context(ReadStdinSnafu)?;
            input
        }
    };

    let list = process(arguments.function, &input, arguments.fn_config.as_deref())?;
    let output = list.to_yaml().context(SerializeOutputSnafu)?;

    match &arguments.output {
        Some(path) => fs::write(path, output).context(WriteFileSnafu { path })?,
        None => io::stdout()
            .write_all(output.as_bytes())
            .context(WriteStdoutSnafu)?,
    }

    // A standalone stream has nowhere to carry results.
    if list.standalone {
        let mut stderr = io::stderr().lock();
        for result in &list.results {
            writeln!(stderr, "{result}").context(WriteStderrSnafu)?;
        }
    }

    let errors = list.results.iter().filter(|result| result.is_error()).count();
    ensure!(
        errors == 0,
        FunctionFailedSnafu {
            function: arguments.function,
            errors
        }
    );
    Ok(())
}

/// Parses `input`, applies the function and returns the updated list.
fn process(
    function: FunctionKind,
    input: &str,
    fn_config: Option<&Path>,
) -> Result<ResourceList, Error> {
    let mut list = ResourceList::parse(input).context(ParseInputSnafu)?;

    if let Some(path) = fn_config {
        list.function_config =
            Some(serde_yaml::from_str(&read(path)?).context(ParseFunctionConfigSnafu { path })?);
    }

    tracing::info!(
        %function,
        items = list.items.len(),
        standalone = list.standalone,
        "running function"
    );
    function.run(&mut list);
    Ok(list)
}

fn read(path: &Path) -> Result<String, Error> {
    fs::read_to_string(path).context(ReadFileSnafu { path })
}
