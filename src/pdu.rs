// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bit-exact PDU encode/decode for the supported function codes, plus
//! exception responses. Pure and allocation-free: every function writes
//! into a caller-owned buffer or returns a view borrowed from the input.
//!
//! The maximum PDU (function byte + payload) is 253 bytes, the ceiling
//! imposed by the RTU ADU (`unit` + PDU + 2-byte CRC ≤ 256 bytes).

use crate::bytes_util::{pack_coils, packed_coil_bytes, read_u16_be, unpack_coils, write_u16_be};
use crate::error::{Error, ExceptionCode, Result};

/// Maximum size in bytes of a Modbus PDU (function code + payload).
pub const MAX_PDU_LEN: usize = 253;

/// Function code byte values (§6).
pub mod function_code {
    pub const READ_COILS: u8 = 0x01;
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
    pub const READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;

    /// The top bit that marks a response PDU as an exception.
    pub const EXCEPTION_BIT: u8 = 0x80;
}
use function_code as fc;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// A borrowed view over a big-endian-packed run of 16-bit registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers<'a> {
    raw: &'a [u8],
}

impl<'a> Registers<'a> {
    fn new(raw: &'a [u8]) -> Self {
        debug_assert_eq!(raw.len() % 2, 0);
        Self { raw }
    }

    /// Number of registers in this view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len() / 2
    }

    /// Whether this view contains no registers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Reads the register at `index`, or `None` if out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<u16> {
        let offset = index.checked_mul(2)?;
        self.raw.get(offset..offset + 2).map(read_u16_be)
    }

    /// Iterates over the registers in order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.len()).map(move |i| self.get(i).unwrap())
    }
}

/// A borrowed view over LSB-first packed coil bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coils<'a> {
    raw: &'a [u8],
    /// Upper bound on valid bits; trailing padding bits are undefined.
    bit_capacity: usize,
}

impl<'a> Coils<'a> {
    fn new(raw: &'a [u8], bit_capacity: usize) -> Self {
        Self { raw, bit_capacity }
    }

    /// Number of addressable bits this view was built to hold (includes
    /// any trailing padding added to round up to a whole byte).
    #[must_use]
    pub fn bit_capacity(&self) -> usize {
        self.bit_capacity
    }

    /// Reads the coil at `index`, or `None` if out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.bit_capacity {
            return None;
        }
        Some(self.raw[index / 8] & (1 << (index % 8)) != 0)
    }

    /// Iterates over the first `count` coils.
    pub fn iter(&self, count: usize) -> impl Iterator<Item = bool> + '_ {
        (0..count).map(move |i| self.get(i).unwrap_or(false))
    }
}

/// A request PDU: a message from the client (master) to the server (slave).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    ReadCoils { start: u16, quantity: u16 },
    ReadDiscreteInputs { start: u16, quantity: u16 },
    ReadHoldingRegisters { start: u16, quantity: u16 },
    ReadInputRegisters { start: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { start: u16, quantity: u16, coils: Coils<'a> },
    WriteMultipleRegisters { start: u16, registers: Registers<'a> },
    ReadWriteMultipleRegisters {
        read_start: u16,
        read_quantity: u16,
        write_start: u16,
        write_registers: Registers<'a>,
    },
}

impl Request<'_> {
    /// The function code this request is encoded with.
    #[must_use]
    pub fn function_code(&self) -> u8 {
        match self {
            Self::ReadCoils { .. } => fc::READ_COILS,
            Self::ReadDiscreteInputs { .. } => fc::READ_DISCRETE_INPUTS,
            Self::ReadHoldingRegisters { .. } => fc::READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters { .. } => fc::READ_INPUT_REGISTERS,
            Self::WriteSingleCoil { .. } => fc::WRITE_SINGLE_COIL,
            Self::WriteSingleRegister { .. } => fc::WRITE_SINGLE_REGISTER,
            Self::WriteMultipleCoils { .. } => fc::WRITE_MULTIPLE_COILS,
            Self::WriteMultipleRegisters { .. } => fc::WRITE_MULTIPLE_REGISTERS,
            Self::ReadWriteMultipleRegisters { .. } => fc::READ_WRITE_MULTIPLE_REGISTERS,
        }
    }
}

/// A response PDU: a message from the server (slave) to the client (master).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<'a> {
    ReadCoils(Coils<'a>),
    ReadDiscreteInputs(Coils<'a>),
    ReadHoldingRegisters(Registers<'a>),
    ReadInputRegisters(Registers<'a>),
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { start: u16, quantity: u16 },
    WriteMultipleRegisters { start: u16, quantity: u16 },
    ReadWriteMultipleRegisters(Registers<'a>),
}

impl Response<'_> {
    /// The function code this response is encoded with.
    #[must_use]
    pub fn function_code(&self) -> u8 {
        match self {
            Self::ReadCoils(_) => fc::READ_COILS,
            Self::ReadDiscreteInputs(_) => fc::READ_DISCRETE_INPUTS,
            Self::ReadHoldingRegisters(_) => fc::READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters(_) => fc::READ_INPUT_REGISTERS,
            Self::WriteSingleCoil { .. } => fc::WRITE_SINGLE_COIL,
            Self::WriteSingleRegister { .. } => fc::WRITE_SINGLE_REGISTER,
            Self::WriteMultipleCoils { .. } => fc::WRITE_MULTIPLE_COILS,
            Self::WriteMultipleRegisters { .. } => fc::WRITE_MULTIPLE_REGISTERS,
            Self::ReadWriteMultipleRegisters(_) => fc::READ_WRITE_MULTIPLE_REGISTERS,
        }
    }
}

fn check_quantity(quantity: u16, min: u16, max: u16, what: &'static str) -> Result<()> {
    if quantity < min || quantity > max {
        return Err(Error::InvalidArgument(what));
    }
    Ok(())
}

fn check_capacity(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(Error::InvalidArgument("buffer too small for PDU"));
    }
    if needed > MAX_PDU_LEN {
        return Err(Error::InvalidArgument("PDU exceeds 253-byte ceiling"));
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Requests: build_<fc>_request / parse_<fc>_request
// ---------------------------------------------------------------------

/// Builds a `Read Coils` (0x01) / `Read Discrete Inputs` (0x02) style
/// request PDU. `quantity` must be in `1..=2000`.
fn build_read_bits_request(buf: &mut [u8], function: u8, start: u16, quantity: u16) -> Result<usize> {
    check_quantity(quantity, 1, 2000, "bit quantity out of range (1..=2000)")?;
    check_capacity(buf, 5)?;
    buf[0] = function;
    write_u16_be(&mut buf[1..3], start);
    write_u16_be(&mut buf[3..5], quantity);
    Ok(5)
}

/// Builds a `Read Holding Registers` (0x03) / `Read Input Registers` (0x04)
/// style request PDU. `quantity` must be in `1..=125`.
fn build_read_registers_request(buf: &mut [u8], function: u8, start: u16, quantity: u16) -> Result<usize> {
    check_quantity(quantity, 1, 125, "register quantity out of range (1..=125)")?;
    check_capacity(buf, 5)?;
    buf[0] = function;
    write_u16_be(&mut buf[1..3], start);
    write_u16_be(&mut buf[3..5], quantity);
    Ok(5)
}

/// Builds a `Write Single Coil` (0x05) request PDU.
pub fn build_write_single_coil_request(buf: &mut [u8], address: u16, value: bool) -> Result<usize> {
    check_capacity(buf, 5)?;
    buf[0] = fc::WRITE_SINGLE_COIL;
    write_u16_be(&mut buf[1..3], address);
    write_u16_be(&mut buf[3..5], if value { COIL_ON } else { COIL_OFF });
    Ok(5)
}

/// Builds a `Write Single Register` (0x06) request PDU.
pub fn build_write_single_register_request(buf: &mut [u8], address: u16, value: u16) -> Result<usize> {
    check_capacity(buf, 5)?;
    buf[0] = fc::WRITE_SINGLE_REGISTER;
    write_u16_be(&mut buf[1..3], address);
    write_u16_be(&mut buf[3..5], value);
    Ok(5)
}

/// Builds a `Write Multiple Coils` (0x0F) request PDU. `coils.len()` must
/// be in `1..=1968`.
pub fn build_write_multiple_coils_request(buf: &mut [u8], start: u16, coils: &[bool]) -> Result<usize> {
    let quantity = coils.len();
    check_quantity(
        u16::try_from(quantity).unwrap_or(u16::MAX),
        1,
        1968,
        "coil quantity out of range (1..=1968)",
    )?;
    let byte_count = packed_coil_bytes(quantity);
    let len = 6 + byte_count;
    check_capacity(buf, len)?;
    buf[0] = fc::WRITE_MULTIPLE_COILS;
    write_u16_be(&mut buf[1..3], start);
    #[allow(clippy::cast_possible_truncation)]
    write_u16_be(&mut buf[3..5], quantity as u16);
    #[allow(clippy::cast_possible_truncation)]
    {
        buf[5] = byte_count as u8;
    }
    pack_coils(coils, &mut buf[6..len]);
    Ok(len)
}

/// Builds a `Write Multiple Registers` (0x10) request PDU. `registers.len()`
/// must be in `1..=123`.
pub fn build_write_multiple_registers_request(buf: &mut [u8], start: u16, registers: &[u16]) -> Result<usize> {
    let quantity = registers.len();
    check_quantity(
        u16::try_from(quantity).unwrap_or(u16::MAX),
        1,
        123,
        "register quantity out of range (1..=123)",
    )?;
    let byte_count = quantity * 2;
    let len = 6 + byte_count;
    check_capacity(buf, len)?;
    buf[0] = fc::WRITE_MULTIPLE_REGISTERS;
    write_u16_be(&mut buf[1..3], start);
    #[allow(clippy::cast_possible_truncation)]
    write_u16_be(&mut buf[3..5], quantity as u16);
    #[allow(clippy::cast_possible_truncation)]
    {
        buf[5] = byte_count as u8;
    }
    for (i, &reg) in registers.iter().enumerate() {
        write_u16_be(&mut buf[6 + i * 2..8 + i * 2], reg);
    }
    Ok(len)
}

/// Builds a `Read/Write Multiple Registers` (0x17) request PDU. Read
/// quantity must be in `1..=125`, write registers in `1..=121`.
pub fn build_read_write_multiple_registers_request(
    buf: &mut [u8],
    read_start: u16,
    read_quantity: u16,
    write_start: u16,
    write_registers: &[u16],
) -> Result<usize> {
    check_quantity(read_quantity, 1, 125, "read quantity out of range (1..=125)")?;
    let write_quantity = write_registers.len();
    check_quantity(
        u16::try_from(write_quantity).unwrap_or(u16::MAX),
        1,
        121,
        "write quantity out of range (1..=121)",
    )?;
    let byte_count = write_quantity * 2;
    let len = 10 + byte_count;
    check_capacity(buf, len)?;
    buf[0] = fc::READ_WRITE_MULTIPLE_REGISTERS;
    write_u16_be(&mut buf[1..3], read_start);
    write_u16_be(&mut buf[3..5], read_quantity);
    write_u16_be(&mut buf[5..7], write_start);
    #[allow(clippy::cast_possible_truncation)]
    write_u16_be(&mut buf[7..9], write_quantity as u16);
    #[allow(clippy::cast_possible_truncation)]
    {
        buf[9] = byte_count as u8;
    }
    for (i, &reg) in write_registers.iter().enumerate() {
        write_u16_be(&mut buf[10 + i * 2..12 + i * 2], reg);
    }
    Ok(len)
}

/// Parses a request PDU, dispatching on its leading function code byte.
pub fn parse_request(pdu: &[u8]) -> Result<Request<'_>> {
    let &function = pdu.first().ok_or(Error::InvalidArgument("empty PDU"))?;
    match function {
        fc::READ_COILS | fc::READ_DISCRETE_INPUTS => {
            if pdu.len() != 5 {
                return Err(Error::InvalidArgument("malformed read-bits request"));
            }
            let start = read_u16_be(&pdu[1..3]);
            let quantity = read_u16_be(&pdu[3..5]);
            check_quantity(quantity, 1, 2000, "bit quantity out of range (1..=2000)")?;
            Ok(if function == fc::READ_COILS {
                Request::ReadCoils { start, quantity }
            } else {
                Request::ReadDiscreteInputs { start, quantity }
            })
        }
        fc::READ_HOLDING_REGISTERS | fc::READ_INPUT_REGISTERS => {
            if pdu.len() != 5 {
                return Err(Error::InvalidArgument("malformed read-registers request"));
            }
            let start = read_u16_be(&pdu[1..3]);
            let quantity = read_u16_be(&pdu[3..5]);
            check_quantity(quantity, 1, 125, "register quantity out of range (1..=125)")?;
            Ok(if function == fc::READ_HOLDING_REGISTERS {
                Request::ReadHoldingRegisters { start, quantity }
            } else {
                Request::ReadInputRegisters { start, quantity }
            })
        }
        fc::WRITE_SINGLE_COIL => {
            if pdu.len() != 5 {
                return Err(Error::InvalidArgument("malformed write-single-coil request"));
            }
            let address = read_u16_be(&pdu[1..3]);
            let raw = read_u16_be(&pdu[3..5]);
            let value = match raw {
                COIL_ON => true,
                COIL_OFF => false,
                _ => return Err(Error::InvalidArgument("coil value must be 0x0000 or 0xFF00")),
            };
            Ok(Request::WriteSingleCoil { address, value })
        }
        fc::WRITE_SINGLE_REGISTER => {
            if pdu.len() != 5 {
                return Err(Error::InvalidArgument("malformed write-single-register request"));
            }
            let address = read_u16_be(&pdu[1..3]);
            let value = read_u16_be(&pdu[3..5]);
            Ok(Request::WriteSingleRegister { address, value })
        }
        fc::WRITE_MULTIPLE_COILS => {
            if pdu.len() < 6 {
                return Err(Error::InvalidArgument("malformed write-multiple-coils request"));
            }
            let start = read_u16_be(&pdu[1..3]);
            let quantity = read_u16_be(&pdu[3..5]);
            check_quantity(quantity, 1, 1968, "coil quantity out of range (1..=1968)")?;
            let byte_count = usize::from(pdu[5]);
            if byte_count != packed_coil_bytes(usize::from(quantity)) || pdu.len() != 6 + byte_count {
                return Err(Error::InvalidArgument("byte count mismatch"));
            }
            Ok(Request::WriteMultipleCoils {
                start,
                quantity,
                coils: Coils::new(&pdu[6..6 + byte_count], usize::from(quantity)),
            })
        }
        fc::WRITE_MULTIPLE_REGISTERS => {
            if pdu.len() < 6 {
                return Err(Error::InvalidArgument("malformed write-multiple-registers request"));
            }
            let start = read_u16_be(&pdu[1..3]);
            let quantity = read_u16_be(&pdu[3..5]);
            check_quantity(quantity, 1, 123, "register quantity out of range (1..=123)")?;
            let byte_count = usize::from(pdu[5]);
            if byte_count != usize::from(quantity) * 2 || byte_count % 2 != 0 || pdu.len() != 6 + byte_count {
                return Err(Error::InvalidArgument("byte count mismatch"));
            }
            Ok(Request::WriteMultipleRegisters {
                start,
                registers: Registers::new(&pdu[6..6 + byte_count]),
            })
        }
        fc::READ_WRITE_MULTIPLE_REGISTERS => {
            if pdu.len() < 10 {
                return Err(Error::InvalidArgument("malformed read-write-registers request"));
            }
            let read_start = read_u16_be(&pdu[1..3]);
            let read_quantity = read_u16_be(&pdu[3..5]);
            let write_start = read_u16_be(&pdu[5..7]);
            let write_quantity = read_u16_be(&pdu[7..9]);
            check_quantity(read_quantity, 1, 125, "read quantity out of range (1..=125)")?;
            check_quantity(write_quantity, 1, 121, "write quantity out of range (1..=121)")?;
            let byte_count = usize::from(pdu[9]);
            if byte_count != usize::from(write_quantity) * 2 || pdu.len() != 10 + byte_count {
                return Err(Error::InvalidArgument("byte count mismatch"));
            }
            Ok(Request::ReadWriteMultipleRegisters {
                read_start,
                read_quantity,
                write_start,
                write_registers: Registers::new(&pdu[10..10 + byte_count]),
            })
        }
        _ => Err(Error::InvalidArgument("unsupported function code")),
    }
}

/// Encodes `request` into `buf`, returning the number of bytes written.
pub fn encode_request(request: &Request<'_>, buf: &mut [u8]) -> Result<usize> {
    match *request {
        Request::ReadCoils { start, quantity } => {
            build_read_bits_request(buf, fc::READ_COILS, start, quantity)
        }
        Request::ReadDiscreteInputs { start, quantity } => {
            build_read_bits_request(buf, fc::READ_DISCRETE_INPUTS, start, quantity)
        }
        Request::ReadHoldingRegisters { start, quantity } => {
            build_read_registers_request(buf, fc::READ_HOLDING_REGISTERS, start, quantity)
        }
        Request::ReadInputRegisters { start, quantity } => {
            build_read_registers_request(buf, fc::READ_INPUT_REGISTERS, start, quantity)
        }
        Request::WriteSingleCoil { address, value } => {
            build_write_single_coil_request(buf, address, value)
        }
        Request::WriteSingleRegister { address, value } => {
            build_write_single_register_request(buf, address, value)
        }
        Request::WriteMultipleCoils { start, quantity, coils } => {
            let mut tmp = [false; 1968];
            let n = usize::from(quantity);
            for (i, slot) in tmp[..n].iter_mut().enumerate() {
                *slot = coils.get(i).unwrap_or(false);
            }
            build_write_multiple_coils_request(buf, start, &tmp[..n])
        }
        Request::WriteMultipleRegisters { start, registers } => {
            let mut tmp = [0u16; 123];
            let n = registers.len();
            for (i, slot) in tmp[..n].iter_mut().enumerate() {
                *slot = registers.get(i).unwrap();
            }
            build_write_multiple_registers_request(buf, start, &tmp[..n])
        }
        Request::ReadWriteMultipleRegisters {
            read_start,
            read_quantity,
            write_start,
            write_registers,
        } => {
            let mut tmp = [0u16; 121];
            let n = write_registers.len();
            for (i, slot) in tmp[..n].iter_mut().enumerate() {
                *slot = write_registers.get(i).unwrap();
            }
            build_read_write_multiple_registers_request(buf, read_start, read_quantity, write_start, &tmp[..n])
        }
    }
}

// ---------------------------------------------------------------------
// Responses: build_<fc>_response / parse_<fc>_response
// ---------------------------------------------------------------------

/// Builds a `Read Coils` (0x01) / `Read Discrete Inputs` (0x02) response PDU.
pub fn build_read_bits_response(buf: &mut [u8], function: u8, coils: &[bool]) -> Result<usize> {
    let byte_count = packed_coil_bytes(coils.len());
    let len = 2 + byte_count;
    check_capacity(buf, len)?;
    buf[0] = function;
    #[allow(clippy::cast_possible_truncation)]
    {
        buf[1] = byte_count as u8;
    }
    pack_coils(coils, &mut buf[2..len]);
    Ok(len)
}

/// Builds a `Read Holding/Input Registers` (0x03/0x04) or
/// `Read/Write Multiple Registers` (0x17) style response PDU.
pub fn build_read_registers_response(buf: &mut [u8], function: u8, registers: &[u16]) -> Result<usize> {
    let byte_count = registers.len() * 2;
    let len = 2 + byte_count;
    check_capacity(buf, len)?;
    buf[0] = function;
    #[allow(clippy::cast_possible_truncation)]
    {
        buf[1] = byte_count as u8;
    }
    for (i, &reg) in registers.iter().enumerate() {
        write_u16_be(&mut buf[2 + i * 2..4 + i * 2], reg);
    }
    Ok(len)
}

/// Builds a `Write Single Coil` (0x05) response PDU (echoes the request).
pub fn build_write_single_coil_response(buf: &mut [u8], address: u16, value: bool) -> Result<usize> {
    build_write_single_coil_request(buf, address, value)
}

/// Builds a `Write Single Register` (0x06) response PDU (echoes the request).
pub fn build_write_single_register_response(buf: &mut [u8], address: u16, value: u16) -> Result<usize> {
    build_write_single_register_request(buf, address, value)
}

/// Builds a `Write Multiple Coils` (0x0F) / `Write Multiple Registers`
/// (0x10) response PDU.
pub fn build_write_multiple_response(buf: &mut [u8], function: u8, start: u16, quantity: u16) -> Result<usize> {
    check_capacity(buf, 5)?;
    buf[0] = function;
    write_u16_be(&mut buf[1..3], start);
    write_u16_be(&mut buf[3..5], quantity);
    Ok(5)
}

/// Builds an exception response: `[function | 0x80][exception-code]`.
pub fn build_exception_response(buf: &mut [u8], function: u8, code: ExceptionCode) -> Result<usize> {
    check_capacity(buf, 2)?;
    buf[0] = function | fc::EXCEPTION_BIT;
    buf[1] = code as u8;
    Ok(2)
}

/// Parses a response PDU. Exception responses (top bit of the function
/// code set) are surfaced as `Err(Error::Exception { .. })`, matching the
/// error design's "exceptions are legitimate server responses" rule.
pub fn parse_response(pdu: &[u8]) -> Result<Response<'_>> {
    let &function = pdu.first().ok_or(Error::InvalidArgument("empty PDU"))?;
    if function & fc::EXCEPTION_BIT != 0 {
        let original_function = function & !fc::EXCEPTION_BIT;
        let &raw_code = pdu.get(1).ok_or(Error::InvalidArgument("truncated exception"))?;
        let code = ExceptionCode::from_u8(raw_code)
            .ok_or(Error::InvalidArgument("exception code out of range (0x01..=0x04)"))?;
        return Err(Error::Exception {
            function: original_function,
            code,
        });
    }
    match function {
        fc::READ_COILS | fc::READ_DISCRETE_INPUTS => {
            let &byte_count = pdu.get(1).ok_or(Error::InvalidArgument("truncated read-bits response"))?;
            let byte_count = usize::from(byte_count);
            if pdu.len() != 2 + byte_count {
                return Err(Error::InvalidArgument("byte count mismatch"));
            }
            let coils = Coils::new(&pdu[2..2 + byte_count], byte_count * 8);
            Ok(if function == fc::READ_COILS {
                Response::ReadCoils(coils)
            } else {
                Response::ReadDiscreteInputs(coils)
            })
        }
        fc::READ_HOLDING_REGISTERS | fc::READ_INPUT_REGISTERS | fc::READ_WRITE_MULTIPLE_REGISTERS => {
            let &byte_count = pdu
                .get(1)
                .ok_or(Error::InvalidArgument("truncated read-registers response"))?;
            let byte_count = usize::from(byte_count);
            if byte_count % 2 != 0 || pdu.len() != 2 + byte_count {
                return Err(Error::InvalidArgument("byte count mismatch"));
            }
            let registers = Registers::new(&pdu[2..2 + byte_count]);
            Ok(match function {
                fc::READ_HOLDING_REGISTERS => Response::ReadHoldingRegisters(registers),
                fc::READ_INPUT_REGISTERS => Response::ReadInputRegisters(registers),
                _ => Response::ReadWriteMultipleRegisters(registers),
            })
        }
        fc::WRITE_SINGLE_COIL => {
            if pdu.len() != 5 {
                return Err(Error::InvalidArgument("malformed write-single-coil response"));
            }
            let address = read_u16_be(&pdu[1..3]);
            let value = match read_u16_be(&pdu[3..5]) {
                COIL_ON => true,
                COIL_OFF => false,
                _ => return Err(Error::InvalidArgument("coil value must be 0x0000 or 0xFF00")),
            };
            Ok(Response::WriteSingleCoil { address, value })
        }
        fc::WRITE_SINGLE_REGISTER => {
            if pdu.len() != 5 {
                return Err(Error::InvalidArgument("malformed write-single-register response"));
            }
            Ok(Response::WriteSingleRegister {
                address: read_u16_be(&pdu[1..3]),
                value: read_u16_be(&pdu[3..5]),
            })
        }
        fc::WRITE_MULTIPLE_COILS | fc::WRITE_MULTIPLE_REGISTERS => {
            if pdu.len() != 5 {
                return Err(Error::InvalidArgument("malformed write-multiple response"));
            }
            let start = read_u16_be(&pdu[1..3]);
            let quantity = read_u16_be(&pdu[3..5]);
            Ok(if function == fc::WRITE_MULTIPLE_COILS {
                Response::WriteMultipleCoils { start, quantity }
            } else {
                Response::WriteMultipleRegisters { start, quantity }
            })
        }
        _ => Err(Error::InvalidArgument("unsupported function code")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_holding_registers_request_round_trip() {
        let req = Request::ReadHoldingRegisters { start: 0, quantity: 10 };
        let mut buf = [0u8; MAX_PDU_LEN];
        let len = encode_request(&req, &mut buf).unwrap();
        assert_eq!(&buf[..len], &[0x03, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(parse_request(&buf[..len]).unwrap(), req);
    }

    #[test]
    fn read_holding_registers_response_values() {
        let regs = [100u16, 200, 300, 400, 500, 600, 700, 800, 900, 1000];
        let mut buf = [0u8; MAX_PDU_LEN];
        let len = build_read_registers_response(&mut buf, fc::READ_HOLDING_REGISTERS, &regs).unwrap();
        assert_eq!(
            &buf[..len],
            &[
                0x03, 0x14, 0x00, 0x64, 0x00, 0xC8, 0x01, 0x2C, 0x01, 0x90, 0x01, 0xF4, 0x02, 0x58, 0x02, 0xBC, 0x03,
                0x20, 0x03, 0x84, 0x03, 0xE8,
            ]
        );
        let parsed = parse_response(&buf[..len]).unwrap();
        let Response::ReadHoldingRegisters(view) = parsed else {
            panic!("wrong variant");
        };
        assert_eq!(view.iter().collect::<heapless::Vec<u16, 10>>(), regs.as_slice());
    }

    #[test]
    fn write_single_coil_wire_bytes() {
        let mut buf = [0u8; MAX_PDU_LEN];
        let len = build_write_single_coil_request(&mut buf, 0x0005, true).unwrap();
        assert_eq!(&buf[..len], &[0x05, 0x00, 0x05, 0xFF, 0x00]);
    }

    #[test]
    fn rejects_quantity_out_of_range() {
        let mut buf = [0u8; MAX_PDU_LEN];
        assert_eq!(
            build_read_registers_request(&mut buf, fc::READ_HOLDING_REGISTERS, 0, 126),
            Err(Error::InvalidArgument("register quantity out of range (1..=125)"))
        );
        assert_eq!(
            build_read_registers_request(&mut buf, fc::READ_HOLDING_REGISTERS, 0, 0),
            Err(Error::InvalidArgument("register quantity out of range (1..=125)"))
        );
        assert_eq!(
            build_read_bits_request(&mut buf, fc::READ_COILS, 0, 2001),
            Err(Error::InvalidArgument("bit quantity out of range (1..=2000)"))
        );
    }

    #[test]
    fn rejects_malformed_coil_value() {
        let pdu = [fc::WRITE_SINGLE_COIL, 0x00, 0x05, 0x12, 0x34];
        assert_eq!(
            parse_request(&pdu),
            Err(Error::InvalidArgument("coil value must be 0x0000 or 0xFF00"))
        );
    }

    #[test]
    fn write_multiple_coils_round_trip() {
        let coils = [true, false, true, true];
        let mut buf = [0u8; MAX_PDU_LEN];
        let len = build_write_multiple_coils_request(&mut buf, 0x3311, &coils).unwrap();
        assert_eq!(&buf[..len], &[0x0F, 0x33, 0x11, 0x00, 0x04, 0x01, 0b0000_1101]);
        let Request::WriteMultipleCoils { coils: view, quantity, .. } = parse_request(&buf[..len]).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(quantity, 4);
        assert_eq!(view.iter(4).collect::<heapless::Vec<bool, 4>>(), coils.as_slice());
    }

    #[test]
    fn exception_response_fidelity() {
        let mut buf = [0u8; MAX_PDU_LEN];
        let len = build_exception_response(&mut buf, fc::READ_HOLDING_REGISTERS, ExceptionCode::IllegalDataAddress)
            .unwrap();
        assert_eq!(&buf[..len], &[0x83, 0x02]);
        match parse_response(&buf[..len]) {
            Err(Error::Exception { function, code }) => {
                assert_eq!(function, fc::READ_HOLDING_REGISTERS);
                assert_eq!(code, ExceptionCode::IllegalDataAddress);
            }
            other => panic!("expected exception, got {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_exception_code() {
        let pdu = [0x83, 0x00];
        assert!(parse_response(&pdu).is_err());
        let pdu = [0x83, 0x05];
        assert!(parse_response(&pdu).is_err());
    }

    #[test]
    fn read_write_multiple_registers_round_trip() {
        let write_regs = [0xABCDu16, 0xEF12];
        let mut buf = [0u8; MAX_PDU_LEN];
        let len = build_read_write_multiple_registers_request(&mut buf, 0x05, 51, 0x03, &write_regs).unwrap();
        assert_eq!(
            &buf[..len],
            &[0x17, 0x00, 0x05, 0x00, 0x33, 0x00, 0x03, 0xAB, 0xCD, 0xEF, 0x12]
        );
        let Request::ReadWriteMultipleRegisters {
            read_start,
            read_quantity,
            write_start,
            write_registers,
        } = parse_request(&buf[..len]).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!((read_start, read_quantity, write_start), (0x05, 51, 0x03));
        assert_eq!(write_registers.iter().collect::<heapless::Vec<u16, 2>>(), write_regs.as_slice());
    }

    #[test]
    fn buffer_too_small_is_invalid_argument() {
        let mut buf = [0u8; 2];
        assert_eq!(
            build_read_registers_request(&mut buf, fc::READ_HOLDING_REGISTERS, 0, 10),
            Err(Error::InvalidArgument("buffer too small for PDU"))
        );
    }
}
