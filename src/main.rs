//! Binary entrypoint that serves the chat API and the static front-end.

use std::process::ExitCode;

use mentor_chat::start;

fn main() -> ExitCode {
    start::run()
}
