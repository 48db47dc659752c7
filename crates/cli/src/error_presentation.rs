use anyhow::Context;
use miette::Report;

const CONNECT_CONTEXT: &str = "while checking the connection";

pub(crate) type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug)]
pub(crate) enum CliError {
    MissingConnectionInput,
    Core(quarry_core::Error),
    #[cfg(not(feature = "mssql"))]
    NoDialectsEnabled,
}

impl From<quarry_core::Error> for CliError {
    fn from(value: quarry_core::Error) -> Self {
        Self::Core(value)
    }
}

pub(crate) fn render_runtime_error(error: CliError) -> String {
    match error {
        CliError::MissingConnectionInput => {
            format!("[usage] {}", missing_connection_message())
        }
        CliError::Core(source) => {
            let category = core_category(&source);
            let report = report_with_context(source, CONNECT_CONTEXT);
            format!("[{category}] {report}")
        }
        #[cfg(not(feature = "mssql"))]
        CliError::NoDialectsEnabled => format!("[config] {}", no_dialects_enabled_message()),
    }
}

fn report_with_context<E, C>(source: E, context: C) -> Report
where
    E: std::error::Error + Send + Sync + 'static,
    C: Into<String>,
{
    let context = context.into();
    let anyhow_error = std::result::Result::<(), E>::Err(source)
        .context(context)
        .expect_err("context wrapping must produce an error");
    miette::miette!("{anyhow_error:#}")
}

pub(crate) fn core_category(error: &quarry_core::Error) -> &'static str {
    match error {
        quarry_core::Error::Config(_) => "config",
        quarry_core::Error::Metadata(_) => "metadata",
        quarry_core::Error::Translation(_) => "translate",
        quarry_core::Error::Usage(_) => "usage",
        quarry_core::Error::Value(_) => "value",
        quarry_core::Error::Schema(_) => "schema",
        quarry_core::Error::Materialize(_) => "materialize",
        quarry_core::Error::Connection(_) => "connection",
        quarry_core::Error::Include(_) => "include",
        quarry_core::Error::Timeout { .. } => "timeout",
        quarry_core::Error::Cancelled => "cancelled",
        quarry_core::Error::Disposed { .. } => "disposed",
    }
}

pub(crate) fn missing_connection_message() -> &'static str {
    "missing connection input: pass --connection-string or --hostname and --database"
}

#[cfg(not(feature = "mssql"))]
fn no_dialects_enabled_message() -> &'static str {
    "no dialect features are enabled for this build; enable mssql"
}
