//! Streaming invocation: the guest pulls input and pushes output byte-by-byte.
//!
//! Guest contract:
//!
//! ```text
//! import env.more() -> i32        1 while input remains, blocks until known
//! import env.get_byte() -> i32    next input byte, 0 once input is exhausted
//! import env.put_byte(i32)        append one output byte, traps if the client is gone
//! export function()               runs until it decides the stream is done
//! ```
//!
//! The host runs on a blocking compute thread; `more` parks it on the input
//! channel. Buffered output is flushed before parking so a guest that
//! answers as it reads never waits on its own output.

use wasmtime::{Caller, Engine, Linker, Module, Store, TypedFunc};

use crate::cluster::channel::{ByteReceiver, ByteSender};
use crate::sandbox::error::{Result, SandboxError};

/// Store data for one streaming instance.
pub struct StreamState {
    input: ByteReceiver,
    output: ByteSender,
}

impl StreamState {
    pub fn new(input: ByteReceiver, output: ByteSender) -> Self {
        Self { input, output }
    }

    fn more(&mut self) -> wasmtime::Result<bool> {
        if let Some(more) = self.input.try_has_more() {
            return Ok(more);
        }
        self.output
            .flush()
            .map_err(|e| wasmtime::Error::msg(format!("output: {}", e)))?;
        Ok(self.input.blocking_has_more())
    }
}

/// Register the host side of the streaming ABI.
pub fn add_to_linker(linker: &mut Linker<StreamState>) -> Result<()> {
    let link_err = |e: wasmtime::Error| SandboxError::Engine(format!("linking streaming ABI: {}", e));

    linker
        .func_wrap("env", "more", |mut caller: Caller<'_, StreamState>| -> wasmtime::Result<i32> {
            caller.data_mut().more().map(i32::from)
        })
        .map_err(link_err)?;

    linker
        .func_wrap("env", "get_byte", |mut caller: Caller<'_, StreamState>| -> i32 {
            let state = caller.data_mut();
            match state.input.try_has_more() {
                Some(true) => state.input.blocking_next_byte().map_or(0, i32::from),
                // Guests are expected to ask `more` first; honour the ABI anyway.
                _ => {
                    let _ = state.output.flush();
                    state.input.blocking_next_byte().map_or(0, i32::from)
                }
            }
        })
        .map_err(link_err)?;

    linker
        .func_wrap(
            "env",
            "put_byte",
            |mut caller: Caller<'_, StreamState>, byte: i32| -> wasmtime::Result<()> {
                caller
                    .data_mut()
                    .output
                    .push_byte(byte as u8)
                    .map_err(|e| wasmtime::Error::msg(format!("output: {}", e)))
            },
        )
        .map_err(link_err)?;

    Ok(())
}

/// Run one streaming invocation on a fresh instance of `module`.
///
/// The output channel is closed when this returns, successfully or not, so
/// the consumer always observes end-of-data.
pub fn invoke(engine: &Engine, module: &Module, input: ByteReceiver, output: ByteSender) -> Result<()> {
    let mut linker = Linker::new(engine);
    add_to_linker(&mut linker)?;

    let mut store = Store::new(engine, StreamState::new(input, output));
    let result = run(&linker, &mut store, module);

    let StreamState { output, .. } = store.into_data();
    let closed = output.close();
    result?;
    closed.map_err(|e| SandboxError::Trap {
        export: "function",
        message: format!("output: {}", e),
    })
}

fn run(linker: &Linker<StreamState>, store: &mut Store<StreamState>, module: &Module) -> Result<()> {
    let instance = linker
        .instantiate(&mut *store, module)
        .map_err(|e| SandboxError::Instantiate(e.to_string()))?;
    let function: TypedFunc<(), ()> = instance
        .get_typed_func(&mut *store, "function")
        .map_err(|e| SandboxError::MissingExport {
            name: "function",
            reason: e.to_string(),
        })?;
    function.call(&mut *store, ()).map_err(|e| SandboxError::Trap {
        export: "function",
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::channel::channel;
    use bytes::Bytes;
    use std::thread;

    const ECHO: &str = include_str!("../../functions/streaming/echo.wat");
    const NOOP: &str = include_str!("../../functions/streaming/noop.wat");

    fn compile(source: &str) -> (Engine, Module) {
        let engine = Engine::default();
        let module = Module::new(&engine, source).unwrap();
        (engine, module)
    }

    /// Push `payload` in `chunk` sized pieces while the guest runs on another thread.
    fn stream_through(source: &str, payload: &[u8], chunk: usize) -> (Result<()>, Vec<u8>) {
        let (engine, module) = compile(source);
        let (mut input_tx, input_rx) = channel();
        let (output_tx, output_rx) = channel();

        let guest = thread::spawn(move || invoke(&engine, &module, input_rx, output_tx));

        for piece in payload.chunks(chunk) {
            input_tx.push(Bytes::copy_from_slice(piece)).unwrap();
        }
        input_tx.close().unwrap();

        let output: Vec<u8> = output_rx.collect();
        (guest.join().unwrap(), output)
    }

    #[test]
    fn echo_preserves_bytes_across_chunkings() {
        let payload: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 256) as u8).collect();
        for chunk in [1, 7, 4096] {
            let (result, output) = stream_through(ECHO, &payload, chunk);
            result.unwrap();
            assert!(output == payload, "mismatch with chunk size {}", chunk);
        }
    }

    #[test]
    fn echo_of_empty_input_is_empty() {
        let (result, output) = stream_through(ECHO, b"", 1);
        result.unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn noop_drains_input_without_output() {
        let (result, output) = stream_through(NOOP, b"ignored bytes", 3);
        result.unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn echo_answers_before_input_closes() {
        let (engine, module) = compile(ECHO);
        let (mut input_tx, input_rx) = channel();
        let (output_tx, mut output_rx) = channel();
        let guest = thread::spawn(move || invoke(&engine, &module, input_rx, output_tx));

        input_tx.push(Bytes::from_static(b"ping")).unwrap();
        let echoed: Vec<u8> = (0..4).filter_map(|_| output_rx.blocking_next_byte()).collect();
        assert_eq!(echoed, b"ping");

        input_tx.close().unwrap();
        guest.join().unwrap().unwrap();
        assert_eq!(output_rx.blocking_next_byte(), None);
    }

    #[test]
    fn dropped_consumer_traps_guest_and_ends_invocation() {
        let (engine, module) = compile(ECHO);
        let (mut input_tx, input_rx) = channel();
        let (output_tx, output_rx) = channel();
        drop(output_rx);

        input_tx.push(Bytes::from_static(b"nobody listens")).unwrap();
        let result = invoke(&engine, &module, input_rx, output_tx);
        assert!(matches!(result, Err(SandboxError::Trap { export: "function", .. })));
    }

    #[test]
    fn missing_function_export_closes_output() {
        let (engine, module) = compile(r#"(module (memory (export "memory") 1))"#);
        let (_input_tx, input_rx) = channel();
        let (output_tx, output_rx) = channel();

        let result = invoke(&engine, &module, input_rx, output_tx);
        assert!(matches!(result, Err(SandboxError::MissingExport { name: "function", .. })));
        assert_eq!(output_rx.count(), 0);
    }
}
