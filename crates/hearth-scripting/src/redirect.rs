use std::sync::{Arc, Mutex};

use mlua::{Function, Lua, RegistryKey, Table, UserData, UserDataMethods, Value, Variadic};
use tracing::{error, info};

use crate::lua_err;

/// Line callback fed by a redirector. Lines arrive without their newline.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Default stdout sink: forward script output through tracing.
pub fn stdout_sink() -> LogSink {
    Arc::new(|line| info!("[lua] {}", line))
}

/// Default stderr sink.
pub fn stderr_sink() -> LogSink {
    Arc::new(|line| error!("[lua] {}", line))
}

/// Adapts raw fragmentary text writes into line-oriented sink calls.
pub struct OutputRedirector {
    buffer: String,
    sink: LogSink,
}

impl OutputRedirector {
    pub fn new(sink: LogSink) -> Self {
        Self {
            buffer: String::new(),
            sink,
        }
    }

    /// Append `text`, emitting every complete line as it forms.
    pub fn write(&mut self, text: &str) {
        self.buffer.push_str(text);
        while let Some(offset) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=offset).collect();
            (self.sink)(&line[..line.len() - 1]);
        }
    }

    /// Emit a trailing partial line, if any.
    pub fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            (self.sink)(&line);
        }
    }
}

impl Drop for OutputRedirector {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Write-only line-buffered stream handle exposed to scripts as `io.stdout`
/// and `io.stderr`.
#[derive(Clone)]
pub(crate) struct RedirectHandle(Arc<Mutex<OutputRedirector>>);

impl UserData for RedirectHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("write", |_, this, parts: Variadic<String>| {
            let mut redirector = this.0.lock().unwrap();
            for part in parts.iter() {
                redirector.write(part);
            }
            Ok(())
        });
    }
}

/// The interpreter-global state displaced by [`install`], restored on
/// manager destruction.
pub(crate) struct InstalledStreams {
    print: RegistryKey,
    io_write: RegistryKey,
    io_stdout: RegistryKey,
    io_stderr: RegistryKey,
    pub(crate) stdout: Arc<Mutex<OutputRedirector>>,
    pub(crate) stderr: Arc<Mutex<OutputRedirector>>,
}

/// Route `print`, `io.write`, `io.stdout`, and `io.stderr` through a pair of
/// line redirectors. Stashes the originals for [`restore`].
pub(crate) fn install(lua: &Lua, out: LogSink, err: LogSink) -> anyhow::Result<InstalledStreams> {
    let globals = lua.globals();
    let io: Table = globals.get("io").map_err(lua_err)?;

    let stash = |value: Value| lua.create_registry_value(value).map_err(lua_err);
    let print = stash(globals.get("print").map_err(lua_err)?)?;
    let io_write = stash(io.get("write").map_err(lua_err)?)?;
    let io_stdout = stash(io.get("stdout").map_err(lua_err)?)?;
    let io_stderr = stash(io.get("stderr").map_err(lua_err)?)?;

    let stdout = Arc::new(Mutex::new(OutputRedirector::new(out)));
    let stderr = Arc::new(Mutex::new(OutputRedirector::new(err)));

    // print(...) keeps stock semantics: tostring each value, tab-separated,
    // newline-terminated.
    let tostring: Function = globals.get("tostring").map_err(lua_err)?;
    let target = stdout.clone();
    let print_fn = lua
        .create_function(move |_, values: Variadic<Value>| {
            let mut line = String::new();
            for (i, value) in values.into_iter().enumerate() {
                if i > 0 {
                    line.push('\t');
                }
                line.push_str(&tostring.call::<String>(value)?);
            }
            line.push('\n');
            target.lock().unwrap().write(&line);
            Ok(())
        })
        .map_err(lua_err)?;
    globals.set("print", print_fn).map_err(lua_err)?;

    let target = stdout.clone();
    let write_fn = lua
        .create_function(move |_, parts: Variadic<String>| {
            let mut redirector = target.lock().unwrap();
            for part in parts.iter() {
                redirector.write(part);
            }
            Ok(())
        })
        .map_err(lua_err)?;
    io.set("write", write_fn).map_err(lua_err)?;
    io.set("stdout", RedirectHandle(stdout.clone()))
        .map_err(lua_err)?;
    io.set("stderr", RedirectHandle(stderr.clone()))
        .map_err(lua_err)?;

    Ok(InstalledStreams {
        print,
        io_write,
        io_stdout,
        io_stderr,
        stdout,
        stderr,
    })
}

/// Put the displaced interpreter globals back.
pub(crate) fn restore(lua: &Lua, streams: InstalledStreams) -> anyhow::Result<()> {
    let globals = lua.globals();
    let io: Table = globals.get("io").map_err(lua_err)?;
    globals
        .set("print", lua.registry_value::<Value>(&streams.print).map_err(lua_err)?)
        .map_err(lua_err)?;
    io.set("write", lua.registry_value::<Value>(&streams.io_write).map_err(lua_err)?)
        .map_err(lua_err)?;
    io.set("stdout", lua.registry_value::<Value>(&streams.io_stdout).map_err(lua_err)?)
        .map_err(lua_err)?;
    io.set("stderr", lua.registry_value::<Value>(&streams.io_stderr).map_err(lua_err)?)
        .map_err(lua_err)?;
    streams.stdout.lock().unwrap().flush();
    streams.stderr.lock().unwrap().flush();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capture() -> (LogSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = lines.clone();
        let sink: LogSink = Arc::new(move |line: &str| {
            sink_lines.lock().unwrap().push(line.to_owned());
        });
        (sink, lines)
    }

    #[test]
    fn test_lines_emitted_at_newline_boundaries() {
        let (sink, lines) = capture();
        let mut redirector = OutputRedirector::new(sink);

        redirector.write("a");
        assert!(lines.lock().unwrap().is_empty());
        redirector.write("b\n");
        assert_eq!(*lines.lock().unwrap(), vec!["ab".to_owned()]);
        redirector.write("c");
        assert_eq!(lines.lock().unwrap().len(), 1);

        redirector.flush();
        assert_eq!(*lines.lock().unwrap(), vec!["ab".to_owned(), "c".to_owned()]);
    }

    #[test]
    fn test_multiple_lines_in_one_write() {
        let (sink, lines) = capture();
        let mut redirector = OutputRedirector::new(sink);
        redirector.write("one\ntwo\nthree");
        assert_eq!(*lines.lock().unwrap(), vec!["one".to_owned(), "two".to_owned()]);
    }

    #[test]
    fn test_no_spurious_empty_lines() {
        let (sink, lines) = capture();
        let mut redirector = OutputRedirector::new(sink);
        redirector.write("");
        redirector.write("partial");
        redirector.flush();
        redirector.flush();
        assert_eq!(*lines.lock().unwrap(), vec!["partial".to_owned()]);
    }

    #[test]
    fn test_empty_line_from_bare_newline() {
        let (sink, lines) = capture();
        let mut redirector = OutputRedirector::new(sink);
        redirector.write("\n");
        assert_eq!(*lines.lock().unwrap(), vec![String::new()]);
    }

    #[test]
    fn test_drop_forces_flush() {
        let (sink, lines) = capture();
        {
            let mut redirector = OutputRedirector::new(sink);
            redirector.write("tail");
        }
        assert_eq!(*lines.lock().unwrap(), vec!["tail".to_owned()]);
    }
}
