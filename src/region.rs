// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server-side data model: a fixed table of address regions, each either
//! owning its storage directly or delegating to a read/write callback
//! pair. Regions are namespaced by kind, since Modbus's four object types
//! (holding/input registers, coils, discrete inputs) occupy disjoint
//! address spaces even though their numeric addresses overlap.

use crate::error::{Error, ExceptionCode, Result};

/// Read/write access to a contiguous run of 16-bit registers.
pub enum RegisterAccess<'a> {
    /// Storage owned directly by the region; reads and writes touch the
    /// slice in place.
    Owned(&'a mut [u16]),
    /// Delegated access. `on_write` is `None` for a read-only region.
    Callback {
        on_read: &'a mut dyn FnMut(u16) -> Result<u16>,
        on_write: Option<&'a mut dyn FnMut(u16, u16) -> Result<()>>,
    },
}

/// Read/write access to a contiguous run of single-bit coils.
pub enum CoilAccess<'a> {
    /// Storage owned directly by the region.
    Owned(&'a mut [bool]),
    /// Delegated access. `on_write` is `None` for a read-only region.
    Callback {
        on_read: &'a mut dyn FnMut(u16) -> Result<bool>,
        on_write: Option<&'a mut dyn FnMut(u16, bool) -> Result<()>>,
    },
}

/// One registered run of registers.
pub struct RegisterRegion<'a> {
    start_address: u16,
    length: u16,
    read_only: bool,
    access: RegisterAccess<'a>,
}

impl<'a> RegisterRegion<'a> {
    /// Declares an owned, writable region backed directly by `storage`.
    #[must_use]
    pub fn owned(start_address: u16, storage: &'a mut [u16]) -> Self {
        Self {
            start_address,
            length: storage.len() as u16,
            read_only: false,
            access: RegisterAccess::Owned(storage),
        }
    }

    /// Declares a region backed by a read callback, and optionally a
    /// write callback; omitting the latter makes the region read-only.
    #[must_use]
    pub fn callback(
        start_address: u16,
        length: u16,
        on_read: &'a mut dyn FnMut(u16) -> Result<u16>,
        on_write: Option<&'a mut dyn FnMut(u16, u16) -> Result<()>>,
    ) -> Self {
        let read_only = on_write.is_none();
        Self {
            start_address,
            length,
            read_only,
            access: RegisterAccess::Callback { on_read, on_write },
        }
    }

    fn end_address(&self) -> u32 {
        u32::from(self.start_address) + u32::from(self.length)
    }

    fn contains(&self, address: u16) -> bool {
        address >= self.start_address && u32::from(address) < self.end_address()
    }

    fn read(&mut self, address: u16) -> Result<u16> {
        let offset = address - self.start_address;
        match &mut self.access {
            RegisterAccess::Owned(storage) => Ok(storage[offset as usize]),
            RegisterAccess::Callback { on_read, .. } => on_read(offset),
        }
    }

    fn write(&mut self, address: u16, value: u16) -> Result<()> {
        if self.read_only {
            return Err(Error::Exception {
                function: 0,
                code: ExceptionCode::IllegalDataAddress,
            });
        }
        let offset = address - self.start_address;
        match &mut self.access {
            RegisterAccess::Owned(storage) => {
                storage[offset as usize] = value;
                Ok(())
            }
            RegisterAccess::Callback { on_write, .. } => on_write
                .as_mut()
                .expect("on_write present whenever read_only is false")(offset, value),
        }
    }
}

/// One registered run of coils.
pub struct CoilRegion<'a> {
    start_address: u16,
    length: u16,
    read_only: bool,
    access: CoilAccess<'a>,
}

impl<'a> CoilRegion<'a> {
    /// Declares an owned, writable region backed directly by `storage`.
    #[must_use]
    pub fn owned(start_address: u16, storage: &'a mut [bool]) -> Self {
        Self {
            start_address,
            length: storage.len() as u16,
            read_only: false,
            access: CoilAccess::Owned(storage),
        }
    }

    /// Declares a region backed by a read callback, and optionally a
    /// write callback; omitting the latter makes the region read-only.
    #[must_use]
    pub fn callback(
        start_address: u16,
        length: u16,
        on_read: &'a mut dyn FnMut(u16) -> Result<bool>,
        on_write: Option<&'a mut dyn FnMut(u16, bool) -> Result<()>>,
    ) -> Self {
        let read_only = on_write.is_none();
        Self {
            start_address,
            length,
            read_only,
            access: CoilAccess::Callback { on_read, on_write },
        }
    }

    fn end_address(&self) -> u32 {
        u32::from(self.start_address) + u32::from(self.length)
    }

    fn contains(&self, address: u16) -> bool {
        address >= self.start_address && u32::from(address) < self.end_address()
    }

    fn read(&mut self, address: u16) -> Result<bool> {
        let offset = address - self.start_address;
        match &mut self.access {
            CoilAccess::Owned(storage) => Ok(storage[offset as usize]),
            CoilAccess::Callback { on_read, .. } => on_read(offset),
        }
    }

    fn write(&mut self, address: u16, value: bool) -> Result<()> {
        if self.read_only {
            return Err(Error::Exception {
                function: 0,
                code: ExceptionCode::IllegalDataAddress,
            });
        }
        let offset = address - self.start_address;
        match &mut self.access {
            CoilAccess::Owned(storage) => {
                storage[offset as usize] = value;
                Ok(())
            }
            CoilAccess::Callback { on_write, .. } => on_write
                .as_mut()
                .expect("on_write present whenever read_only is false")(offset, value),
        }
    }
}

fn find_register_mut<'r, 'a>(regions: &'r mut [RegisterRegion<'a>], address: u16) -> Option<&'r mut RegisterRegion<'a>> {
    let idx = regions
        .binary_search_by(|r| {
            if address < r.start_address {
                core::cmp::Ordering::Greater
            } else if u32::from(address) >= r.end_address() {
                core::cmp::Ordering::Less
            } else {
                core::cmp::Ordering::Equal
            }
        })
        .ok()?;
    Some(&mut regions[idx])
}

fn find_coil_mut<'r, 'a>(regions: &'r mut [CoilRegion<'a>], address: u16) -> Option<&'r mut CoilRegion<'a>> {
    let idx = regions
        .binary_search_by(|r| {
            if address < r.start_address {
                core::cmp::Ordering::Greater
            } else if u32::from(address) >= r.end_address() {
                core::cmp::Ordering::Less
            } else {
                core::cmp::Ordering::Equal
            }
        })
        .ok()?;
    Some(&mut regions[idx])
}

fn overlaps_register(regions: &[RegisterRegion<'_>], candidate: &RegisterRegion<'_>) -> bool {
    regions
        .iter()
        .any(|r| candidate.start_address < u16::try_from(r.end_address()).unwrap_or(u16::MAX) && r.start_address < u16::try_from(candidate.end_address()).unwrap_or(u16::MAX))
}

fn overlaps_coil(regions: &[CoilRegion<'_>], candidate: &CoilRegion<'_>) -> bool {
    regions
        .iter()
        .any(|r| candidate.start_address < u16::try_from(r.end_address()).unwrap_or(u16::MAX) && r.start_address < u16::try_from(candidate.end_address()).unwrap_or(u16::MAX))
}

/// The complete server-side address map: four disjoint namespaces, each a
/// fixed-capacity array kept sorted by `start_address`.
pub struct RegionTable<'a, const N: usize> {
    holding: heapless::Vec<RegisterRegion<'a>, N>,
    input: heapless::Vec<RegisterRegion<'a>, N>,
    coils: heapless::Vec<CoilRegion<'a>, N>,
    discrete: heapless::Vec<CoilRegion<'a>, N>,
}

impl<'a, const N: usize> Default for RegionTable<'a, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> RegionTable<'a, N> {
    /// Creates an empty region table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            holding: heapless::Vec::new(),
            input: heapless::Vec::new(),
            coils: heapless::Vec::new(),
            discrete: heapless::Vec::new(),
        }
    }

    /// Registers a holding-register region, rejecting it on overlap.
    pub fn insert_holding(&mut self, region: RegisterRegion<'a>) -> Result<()> {
        Self::insert_register(&mut self.holding, region)
    }

    /// Registers an input-register region, rejecting it on overlap.
    pub fn insert_input(&mut self, region: RegisterRegion<'a>) -> Result<()> {
        Self::insert_register(&mut self.input, region)
    }

    /// Registers a coil region, rejecting it on overlap.
    pub fn insert_coil(&mut self, region: CoilRegion<'a>) -> Result<()> {
        Self::insert_coil_into(&mut self.coils, region)
    }

    /// Registers a discrete-input region, rejecting it on overlap.
    pub fn insert_discrete(&mut self, region: CoilRegion<'a>) -> Result<()> {
        Self::insert_coil_into(&mut self.discrete, region)
    }

    fn insert_register(into: &mut heapless::Vec<RegisterRegion<'a>, N>, region: RegisterRegion<'a>) -> Result<()> {
        if overlaps_register(into, &region) {
            return Err(Error::InvalidArgument("register region overlaps an existing one"));
        }
        into.push(region)
            .map_err(|_| Error::InvalidArgument("region table is full"))?;
        into.sort_unstable_by_key(|r| r.start_address);
        Ok(())
    }

    fn insert_coil_into(into: &mut heapless::Vec<CoilRegion<'a>, N>, region: CoilRegion<'a>) -> Result<()> {
        if overlaps_coil(into, &region) {
            return Err(Error::InvalidArgument("coil region overlaps an existing one"));
        }
        into.push(region)
            .map_err(|_| Error::InvalidArgument("region table is full"))?;
        into.sort_unstable_by_key(|r| r.start_address);
        Ok(())
    }

    /// Reads `count` consecutive holding registers starting at `start`.
    pub fn read_holding(&mut self, start: u16, count: u16, out: &mut [u16]) -> core::result::Result<(), ExceptionCode> {
        Self::read_registers(&mut self.holding, start, count, out)
    }

    /// Reads `count` consecutive input registers starting at `start`.
    pub fn read_input(&mut self, start: u16, count: u16, out: &mut [u16]) -> core::result::Result<(), ExceptionCode> {
        Self::read_registers(&mut self.input, start, count, out)
    }

    /// Writes `values` into consecutive holding registers starting at `start`.
    pub fn write_holding(&mut self, start: u16, values: &[u16]) -> core::result::Result<(), ExceptionCode> {
        Self::write_registers(&mut self.holding, start, values)
    }

    /// Reads `count` consecutive coils starting at `start`.
    pub fn read_coils(&mut self, start: u16, count: u16, out: &mut [bool]) -> core::result::Result<(), ExceptionCode> {
        Self::read_coil_values(&mut self.coils, start, count, out)
    }

    /// Reads `count` consecutive discrete inputs starting at `start`.
    pub fn read_discrete(&mut self, start: u16, count: u16, out: &mut [bool]) -> core::result::Result<(), ExceptionCode> {
        Self::read_coil_values(&mut self.discrete, start, count, out)
    }

    /// Writes `values` into consecutive coils starting at `start`.
    pub fn write_coils(&mut self, start: u16, values: &[bool]) -> core::result::Result<(), ExceptionCode> {
        Self::write_coil_values(&mut self.coils, start, values)
    }

    fn read_registers(
        regions: &mut [RegisterRegion<'a>],
        start: u16,
        count: u16,
        out: &mut [u16],
    ) -> core::result::Result<(), ExceptionCode> {
        for i in 0..count {
            let address = start.wrapping_add(i);
            let region = find_register_mut(regions, address).ok_or(ExceptionCode::IllegalDataAddress)?;
            out[i as usize] = region.read(address).map_err(|_| ExceptionCode::ServerDeviceFailure)?;
        }
        Ok(())
    }

    fn write_registers(regions: &mut [RegisterRegion<'a>], start: u16, values: &[u16]) -> core::result::Result<(), ExceptionCode> {
        for (i, &value) in values.iter().enumerate() {
            let address = start.wrapping_add(i as u16);
            let region = find_register_mut(regions, address).ok_or(ExceptionCode::IllegalDataAddress)?;
            region.write(address, value).map_err(|err| match err {
                Error::Exception { code, .. } => code,
                _ => ExceptionCode::ServerDeviceFailure,
            })?;
        }
        Ok(())
    }

    fn read_coil_values(
        regions: &mut [CoilRegion<'a>],
        start: u16,
        count: u16,
        out: &mut [bool],
    ) -> core::result::Result<(), ExceptionCode> {
        for i in 0..count {
            let address = start.wrapping_add(i);
            let region = find_coil_mut(regions, address).ok_or(ExceptionCode::IllegalDataAddress)?;
            out[i as usize] = region.read(address).map_err(|_| ExceptionCode::ServerDeviceFailure)?;
        }
        Ok(())
    }

    fn write_coil_values(regions: &mut [CoilRegion<'a>], start: u16, values: &[bool]) -> core::result::Result<(), ExceptionCode> {
        for (i, &value) in values.iter().enumerate() {
            let address = start.wrapping_add(i as u16);
            let region = find_coil_mut(regions, address).ok_or(ExceptionCode::IllegalDataAddress)?;
            region.write(address, value).map_err(|err| match err {
                Error::Exception { code, .. } => code,
                _ => ExceptionCode::ServerDeviceFailure,
            })?;
        }
        Ok(())
    }
}
