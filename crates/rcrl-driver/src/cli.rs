use std::{
    io::{BufRead, Write},
    path::PathBuf,
};

use clap::Parser;
use rcrl_core::{Session, Text, Workspace};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

const LOG_FILTERS: &[&str] = &["warn", "rcrl_core=debug", "rcrl_ast=debug", "rcrl_driver=debug"];

/// A `main()` function that parses the command line arguments and runs
/// the read-compile-run loop.
#[doc(hidden)]
pub fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| LOG_FILTERS.join(",").parse().unwrap());

    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(cli.run())
}

/// Start an interactive read-compile-run-loop session.
#[derive(Debug, clap::Parser)]
struct Cli {
    /// The C++ compiler to invoke for each fragment.
    #[clap(long, env = "CXX", default_value = "c++")]
    cc: String,
    /// Base name used for the session's generated header, source, and
    /// libraries (`<name>.hpp`, `<name>.cpp`, `<name>_<n>.so`).
    #[clap(long, default_value = "session")]
    base_name: String,
    /// Directory to generate files and build artifacts in. A temporary
    /// directory is used if this isn't given.
    #[clap(long)]
    work_dir: Option<PathBuf>,
    /// An extra compiler flag, such as `-I/usr/local/include`. May be
    /// repeated.
    #[clap(long = "flag")]
    flags: Vec<String>,
    /// Capture standard output produced by a loaded fragment's static
    /// initializers (and by destructors on cleanup) and print it back
    /// through this REPL, rather than letting it go straight to the
    /// terminal.
    #[clap(long)]
    redirect_stdout: bool,
}

impl Cli {
    #[tracing::instrument(level = "info", skip_all)]
    async fn run(self) -> anyhow::Result<()> {
        let (work_dir, _guard) = match self.work_dir {
            Some(dir) => (dir, None),
            None => {
                let tmp = tempfile::tempdir()?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };

        let workspace = Workspace {
            dir: work_dir,
            base_name: self.base_name,
        };

        let mut session = Session::new_session(Text::from(self.cc.as_str()), workspace, self.flags)?;

        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        let mut fragment = String::new();

        print_prompt(&mut stdout)?;
        for line in stdin.lock().lines() {
            let line = line?;
            if line.is_empty() {
                if fragment.trim().is_empty() {
                    print_prompt(&mut stdout)?;
                    continue;
                }
                self.compile_and_load(&mut session, &fragment, &mut stdout)
                    .await?;
                fragment.clear();
                print_prompt(&mut stdout)?;
                continue;
            }
            fragment.push_str(&line);
            fragment.push('\n');
        }

        if !fragment.trim().is_empty() {
            self.compile_and_load(&mut session, &fragment, &mut stdout)
                .await?;
        }

        let captured = session.cleanup(self.redirect_stdout)?;
        if !captured.is_empty() {
            writeln!(stdout, "{captured}")?;
        }
        Ok(())
    }

    async fn compile_and_load(
        &self,
        session: &mut Session,
        fragment: &str,
        stdout: &mut impl Write,
    ) -> anyhow::Result<()> {
        if !session.compile(fragment)? {
            writeln!(stdout, "empty fragment, nothing to compile")?;
            return Ok(());
        }

        let status = loop {
            if let Some(status) = session.try_get_exit_status()? {
                break status;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        };

        let output = session.take_compiler_output();
        if !status.success() {
            writeln!(stdout, "compile failed:\n{output}")?;
            return Ok(());
        }
        if !output.is_empty() {
            writeln!(stdout, "{output}")?;
        }

        let captured = session.load(self.redirect_stdout)?;
        if !captured.is_empty() {
            writeln!(stdout, "{captured}")?;
        }
        Ok(())
    }
}

fn print_prompt(stdout: &mut impl Write) -> anyhow::Result<()> {
    write!(stdout, "> ")?;
    stdout.flush()?;
    Ok(())
}
