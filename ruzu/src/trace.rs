// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Text traces of GPU address space operations.
//!
//! One command per line, `#` starts a comment. Numbers are decimal or `0x` hex.
//!
//! ```text
//! map VA OFFSET SIZE        sparse VA SIZE        unmap VA SIZE
//! alloc SIZE                alloc_fixed VA OFFSET SIZE
//! free VA SIZE              write VA HEXBYTES     read VA LEN
//! sem VA PAYLOAD [SIZE]     dump
//! ```
//!
//! The semaphore `SIZE` is `one`, `four`, or the raw structure size field.
//! Ranges must end at or below the GPU VA limit.

use anyhow::{anyhow, bail, Context, Result};
use ruzu_common::settings::parse_u64;
use ruzu_gpu::{GpuMemoryManager, SemaphoreSize};
use ruzu_memory::{HostMemory, MemoryBacking};

/// Longest `read` a trace may request.
pub const MAX_READ_LEN: u64 = 0x10_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Map { va: u64, offset: u64, size: u64 },
    Sparse { va: u64, size: u64 },
    Unmap { va: u64, size: u64 },
    Alloc { size: u64 },
    AllocFixed { va: u64, offset: u64, size: u64 },
    Free { va: u64, size: u64 },
    Write { va: u64, data: Vec<u8> },
    Read { va: u64, len: usize },
    Semaphore { va: u64, payload: u64, size: SemaphoreSize },
    Dump,
}

/// Parse a whole trace. Errors carry the 1-based line number.
pub fn parse_trace(text: &str) -> Result<Vec<Command>> {
    let mut commands = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let command = parse_line(line).with_context(|| format!("line {}", index + 1))?;
        commands.extend(command);
    }
    Ok(commands)
}

/// Parse one line; blank and comment lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>> {
    let line = line.split('#').next().unwrap_or("").trim();
    let mut words = line.split_whitespace();
    let Some(op) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let num = |i: usize| -> Result<u64> {
        let raw = args
            .get(i)
            .ok_or_else(|| anyhow!("`{}` expects more arguments", op))?;
        parse_u64(raw).ok_or_else(|| anyhow!("invalid number {:?}", raw))
    };
    let expect_args = |n: usize| -> Result<()> {
        if args.len() > n {
            bail!("`{}` takes {} arguments, got {}", op, n, args.len());
        }
        Ok(())
    };

    let command = match op {
        "map" => {
            expect_args(3)?;
            Command::Map { va: num(0)?, offset: num(1)?, size: num(2)? }
        }
        "sparse" => {
            expect_args(2)?;
            Command::Sparse { va: num(0)?, size: num(1)? }
        }
        "unmap" => {
            expect_args(2)?;
            Command::Unmap { va: num(0)?, size: num(1)? }
        }
        "alloc" => {
            expect_args(1)?;
            Command::Alloc { size: num(0)? }
        }
        "alloc_fixed" => {
            expect_args(3)?;
            Command::AllocFixed { va: num(0)?, offset: num(1)?, size: num(2)? }
        }
        "free" => {
            expect_args(2)?;
            Command::Free { va: num(0)?, size: num(1)? }
        }
        "write" => {
            expect_args(2)?;
            let hex = args.get(1).ok_or_else(|| anyhow!("`write` expects data"))?;
            Command::Write { va: num(0)?, data: parse_hex_bytes(hex)? }
        }
        "read" => {
            expect_args(2)?;
            let len = num(1)?;
            if len > MAX_READ_LEN {
                bail!("read of 0x{:X} bytes exceeds the 0x{:X} byte limit", len, MAX_READ_LEN);
            }
            Command::Read { va: num(0)?, len: len as usize }
        }
        "sem" => {
            expect_args(3)?;
            let size = match args.get(2) {
                None | Some(&"one") => SemaphoreSize::OneWord,
                Some(&"four") => SemaphoreSize::FourWords,
                Some(raw) => match parse_u64(raw).and_then(|v| u32::try_from(v).ok()) {
                    Some(raw) => SemaphoreSize::from_raw(raw),
                    None => bail!("unknown semaphore size {:?}", raw),
                },
            };
            Command::Semaphore { va: num(0)?, payload: num(1)?, size }
        }
        "dump" => {
            expect_args(0)?;
            Command::Dump
        }
        other => bail!("unknown command {:?}", other),
    };
    Ok(Some(command))
}

fn parse_hex_bytes(hex: &str) -> Result<Vec<u8>> {
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    if hex.is_empty() || hex.len() % 2 != 0 {
        bail!("hex data must have an even, non-zero number of digits");
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte {:?}", &hex[i..i + 2]))
        })
        .collect()
}

/// Runs commands against a GPU memory manager over one host region.
pub struct Replayer {
    gpu: GpuMemoryManager,
    host: HostMemory,
}

impl Replayer {
    pub fn new(gpu: GpuMemoryManager, host: HostMemory) -> Self {
        Self { gpu, host }
    }

    /// Reject ranges that overflow or end above the GPU VA limit.
    fn check_range(&self, va: u64, size: u64) -> Result<()> {
        let limit = self.gpu.va_limit();
        match va.checked_add(size) {
            Some(end) if end <= limit => Ok(()),
            _ => bail!(
                "range 0x{:X}+0x{:X} exceeds the GPU VA limit 0x{:X}",
                va,
                size,
                limit
            ),
        }
    }

    /// Execute one command, returning any text it produces.
    pub fn execute(&self, command: &Command) -> Result<Option<String>> {
        match *command {
            Command::Map { va, size, .. }
            | Command::Sparse { va, size }
            | Command::Unmap { va, size }
            | Command::AllocFixed { va, size, .. }
            | Command::Free { va, size } => self.check_range(va, size)?,
            Command::Write { va, ref data } => self.check_range(va, data.len() as u64)?,
            Command::Read { va, len } => self.check_range(va, len as u64)?,
            Command::Semaphore { va, size, .. } => {
                let len = match size {
                    SemaphoreSize::OneWord => 4,
                    SemaphoreSize::FourWords => 16,
                };
                self.check_range(va, len)?
            }
            Command::Alloc { .. } | Command::Dump => {}
        }

        let output = match *command {
            Command::Map { va, offset, size } => {
                self.gpu.map(va, &self.host, offset, size);
                None
            }
            Command::Sparse { va, size } => {
                self.gpu.map_sparse(va, size);
                None
            }
            Command::Unmap { va, size } => {
                self.gpu.unmap(va, size);
                None
            }
            Command::Alloc { size } => {
                let va = self.gpu.reserve(size)?;
                Some(format!("alloc 0x{:X} -> 0x{:010X}", size, va))
            }
            Command::AllocFixed { va, offset, size } => {
                self.gpu.alloc_fixed(va, &self.host, offset, size)?;
                None
            }
            Command::Free { va, size } => {
                self.gpu.free(va, size)?;
                None
            }
            Command::Write { va, ref data } => {
                self.gpu.write(va, data)?;
                None
            }
            Command::Read { va, len } => {
                let mut buf = vec![0u8; len];
                self.gpu.read(va, &mut buf)?;
                let hex: String = buf.iter().map(|b| format!("{:02X}", b)).collect();
                Some(format!("read 0x{:010X}: {}", va, hex))
            }
            Command::Semaphore { va, payload, size } => {
                self.gpu.write_semaphore(va, payload, size)?;
                None
            }
            Command::Dump => Some(self.dump()),
        };
        Ok(output)
    }

    /// Render the current block list, one run per line.
    pub fn dump(&self) -> String {
        let blocks = self.gpu.blocks();
        blocks
            .iter()
            .enumerate()
            .map(|(i, block)| {
                let end = blocks
                    .get(i + 1)
                    .map_or_else(String::new, |next| format!("0x{:010X}", next.virt));
                let backing = match &block.phys {
                    MemoryBacking::Unmapped => "unmapped".to_string(),
                    MemoryBacking::Host { offset, .. } => format!("host+0x{:X}", offset),
                    MemoryBacking::Sparse => "sparse".to_string(),
                };
                format!("0x{:010X}..{} {}\n", block.virt, end, backing)
            })
            .collect()
    }
}
