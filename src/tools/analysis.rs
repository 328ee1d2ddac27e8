use serde_json::{Value, json};
use tracing::debug;

use super::{MAX_TOOL_OUTPUT, Tool, ToolError, json_schema, str_arg, strip_code_fences, truncate};
use crate::Ctx;
use crate::sandbox::SandboxError;

const DESCRIPTION: &str = "Run an analysis snippet against the loaded dataset. \
`df` is the time-indexed frame (index = timestamp, lower-case column names) and \
`ta` holds indicators: sma, ema, rsi, macd, bollinger, vwap, atr, pct_change, \
log_return, rolling_std, cum_return, where. Assign new columns with df['name'] = ...; \
variables persist between calls. print() output and the value of the last line are \
returned. Write files only with df.to_csv('name.csv') or write_json('name.json', value).";

/// `run_analysis`: execute a snippet in the context's analysis session.
#[derive(Debug, Clone)]
pub struct RunAnalysis {
    max_output: usize,
}

impl Default for RunAnalysis {
    fn default() -> Self {
        Self {
            max_output: MAX_TOOL_OUTPUT,
        }
    }
}

impl RunAnalysis {
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }
}

impl Tool for RunAnalysis {
    fn name(&self) -> &str {
        "run_analysis"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn input_schema(&self) -> Value {
        json_schema(
            json!({"code": {"type": "string", "description": "The snippet to run"}}),
            &["code"],
        )
    }

    fn call(&self, args: &Value, ctx: &mut Ctx) -> Result<String, ToolError> {
        let code = strip_code_fences(str_arg(args, "code")?);
        let session = ctx.session_mut().ok_or(ToolError::NoSession)?;
        debug!(lines = code.lines().count(), "running analysis snippet");

        match session.exec(&code) {
            Ok(out) if out.trim().is_empty() => Ok("(no output)".to_string()),
            Ok(out) => Ok(truncate(out.trim_end(), self.max_output)),
            // Keep what printed before the failure; the model needs it to recover.
            Err(SandboxError::Runtime { line, output, source }) if !output.is_empty() => {
                Err(ToolError::Failed(truncate(
                    &format!("{}\nerror on line {line}: {source}", output.trim_end()),
                    self.max_output,
                )))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::read_financial_csv;
    use crate::sandbox::Session;
    use crate::tools::ToolBox;

    fn ctx() -> (tempfile::TempDir, Ctx) {
        let dir = tempfile::tempdir().unwrap();
        let csv = "Date,Close\n2024-01-01,10\nnot-a-date,11\n2024-01-02,12\n";
        let session = Session::new(read_financial_csv(csv.as_bytes()).unwrap(), dir.path());
        (dir, Ctx::new().with_session(session))
    }

    #[test]
    fn fenced_snippet_runs_in_session() {
        let (_d, mut ctx) = ctx();
        let tool = RunAnalysis::default();
        let out = tool
            .call(&json!({"code": "```python\ndf['ret'] = df.close.pct_change()\ndf.ret.last()\n```"}), &mut ctx)
            .unwrap();
        assert_eq!(out, "0.2");
        // Same session on the next call.
        let out = tool.call(&json!({"code": "df.columns"}), &mut ctx).unwrap();
        assert_eq!(out, "['close', 'ret']");
    }

    #[test]
    fn silent_snippet_reports_no_output() {
        let (_d, mut ctx) = ctx();
        let out = RunAnalysis::default()
            .call(&json!({"code": "x = 1"}), &mut ctx)
            .unwrap();
        assert_eq!(out, "(no output)");
    }

    #[test]
    fn errors_become_tool_errors_with_partial_output() {
        let (_d, mut ctx) = ctx();
        let tools = ToolBox::new().with(RunAnalysis::default());
        let err = tools
            .call("run_analysis", &json!({"code": "print('start')\ndf['nope']"}), &mut ctx)
            .unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("start\nerror on line 2"));
        assert!(text.contains("unknown column 'nope'"));

        let err = tools
            .call("run_analysis", &json!({"code": "x = ("}), &mut ctx)
            .unwrap_err();
        assert!(matches!(err, ToolError::Sandbox(SandboxError::Syntax { .. })));
    }

    #[test]
    fn without_session_the_tool_fails() {
        let mut ctx = Ctx::new();
        let err = RunAnalysis::default()
            .call(&json!({"code": "df"}), &mut ctx)
            .unwrap_err();
        assert!(matches!(err, ToolError::NoSession));
    }

    #[test]
    fn long_output_is_truncated() {
        let (_d, mut ctx) = ctx();
        let out = RunAnalysis::default()
            .with_max_output(5)
            .call(&json!({"code": "print('abcdefghij')"}), &mut ctx)
            .unwrap();
        assert_eq!(out, "abcde\n\n[truncated at 5 chars]");
    }
}
