//! Bulk invocation: whole payload in, whole output out.
//!
//! Guest contract (exports):
//!
//! ```text
//! memory                                  linear memory holding payload and output
//! alloc(size: i32) -> i32                 offset of a `size` byte region, 0 on failure
//! function(offset: i32, len: i32) -> i32  runs on [offset, offset+len), returns output offset
//! get_output_size() -> i32                length of the output region
//! ```
//!
//! Every offset/length pair the guest hands back is checked against the
//! current memory size before the host touches it.

use std::ops::Range;

use wasmtime::{Engine, Instance, Module, Store, TypedFunc, WasmParams, WasmResults};

use crate::sandbox::error::{Result, SandboxError};

/// Run one bulk invocation on a fresh instance of `module`.
///
/// `alloc_size` is requested from the guest regardless of the payload length.
/// The output is copied out of guest memory before the instance is dropped.
pub fn invoke(engine: &Engine, module: &Module, payload: &[u8], alloc_size: u32) -> Result<Vec<u8>> {
    let capacity = alloc_size as usize;
    if payload.len() > capacity {
        return Err(SandboxError::PayloadTooLarge {
            len: payload.len(),
            capacity,
        });
    }

    let mut store = Store::new(engine, ());
    let instance = Instance::new(&mut store, module, &[])
        .map_err(|e| SandboxError::Instantiate(e.to_string()))?;

    let memory = instance
        .get_memory(&mut store, "memory")
        .ok_or(SandboxError::MissingMemory)?;
    let alloc: TypedFunc<i32, i32> = export(&instance, &mut store, "alloc")?;
    let function: TypedFunc<(i32, i32), i32> = export(&instance, &mut store, "function")?;
    let get_output_size: TypedFunc<(), i32> = export(&instance, &mut store, "get_output_size")?;

    let offset = alloc
        .call(&mut store, alloc_size as i32)
        .map_err(|e| trap("alloc", e))?;
    let offset = guest_usize(offset);
    if offset == 0 {
        return Err(SandboxError::AllocationFailed { requested: capacity });
    }
    let input = guest_region("input", memory.data_size(&store), offset, capacity)?;

    // Region was validated for the full allocation, the payload is no longer.
    let start = input.start;
    memory.data_mut(&mut store)[start..start + payload.len()].copy_from_slice(payload);

    let output_offset = function
        .call(&mut store, (offset as i32, payload.len() as i32))
        .map_err(|e| trap("function", e))?;
    let output_size = get_output_size
        .call(&mut store, ())
        .map_err(|e| trap("get_output_size", e))?;

    // The guest may have grown memory while running.
    let output = guest_region(
        "output",
        memory.data_size(&store),
        guest_usize(output_offset),
        guest_usize(output_size),
    )?;
    Ok(memory.data(&store)[output].to_vec())
}

/// Validate `[offset, offset + len)` against a memory of `memory_len` bytes.
pub fn guest_region(
    region: &'static str,
    memory_len: usize,
    offset: usize,
    len: usize,
) -> Result<Range<usize>> {
    let fault = || SandboxError::MemoryFault {
        region,
        offset,
        len,
        memory_len,
    };
    let end = offset.checked_add(len).ok_or_else(fault)?;
    if end > memory_len {
        return Err(fault());
    }
    Ok(offset..end)
}

/// Guest pointers and sizes are unsigned 32-bit values carried in an i32.
fn guest_usize(value: i32) -> usize {
    value as u32 as usize
}

fn export<P, R>(
    instance: &Instance,
    store: &mut Store<()>,
    name: &'static str,
) -> Result<TypedFunc<P, R>>
where
    P: WasmParams,
    R: WasmResults,
{
    instance
        .get_typed_func::<P, R>(store, name)
        .map_err(|e| SandboxError::MissingExport {
            name,
            reason: e.to_string(),
        })
}

fn trap(export: &'static str, error: wasmtime::Error) -> SandboxError {
    SandboxError::Trap {
        export,
        message: error.to_string(),
    }
}
