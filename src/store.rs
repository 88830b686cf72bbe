use crate::frame::{ExceptionCode, MAX_READ_BITS, MAX_READ_WORDS, MAX_WRITE_BITS, MAX_WRITE_WORDS};
use std::sync::RwLock;

pub const DEFAULT_SPACE_SIZE: usize = 10_000;

/// Sizes and write protection for the four address spaces. Discrete inputs
/// and input registers are read-only by protocol regardless; the two booleans
/// additionally seal the normally writable spaces.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub coils: usize,
    pub discrete_inputs: usize,
    pub holding_registers: usize,
    pub input_registers: usize,
    pub read_only_coils: bool,
    pub read_only_holding_registers: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            coils: DEFAULT_SPACE_SIZE,
            discrete_inputs: DEFAULT_SPACE_SIZE,
            holding_registers: DEFAULT_SPACE_SIZE,
            input_registers: DEFAULT_SPACE_SIZE,
            read_only_coils: false,
            read_only_holding_registers: false,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("quantity {quantity} is outside the legal 1..={maximum} range")]
    QuantityOutOfRange { quantity: usize, maximum: u16 },
    #[error("addresses {address}..{end} do not fit the {size}-entry space")]
    AddressOutOfRange { address: u16, end: u32, size: usize },
    #[error("the space is configured read-only")]
    ReadOnlySpace,
}

impl StoreError {
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            StoreError::QuantityOutOfRange { .. } => ExceptionCode::IllegalDataValue,
            StoreError::AddressOutOfRange { .. } => ExceptionCode::IllegalDataAddress,
            StoreError::ReadOnlySpace => ExceptionCode::IllegalFunction,
        }
    }
}

/// The backing model for the four Modbus address spaces.
///
/// Each space sits behind its own lock, so every operation is atomic with
/// respect to concurrent callers and operations on distinct spaces never
/// contend. Locks are held only for the copy itself, never across I/O.
#[derive(Debug)]
pub struct DataStore {
    coils: RwLock<Vec<bool>>,
    discrete_inputs: RwLock<Vec<bool>>,
    holding_registers: RwLock<Vec<u16>>,
    input_registers: RwLock<Vec<u16>>,
    read_only_coils: bool,
    read_only_holding_registers: bool,
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl DataStore {
    pub fn new(config: StoreConfig) -> Self {
        // A 16-bit address can never reach past entry 65535; anything larger
        // would only waste memory.
        let size = |requested: usize| requested.min(1 << 16);
        Self {
            coils: RwLock::new(vec![false; size(config.coils)]),
            discrete_inputs: RwLock::new(vec![false; size(config.discrete_inputs)]),
            holding_registers: RwLock::new(vec![0; size(config.holding_registers)]),
            input_registers: RwLock::new(vec![0; size(config.input_registers)]),
            read_only_coils: config.read_only_coils,
            read_only_holding_registers: config.read_only_holding_registers,
        }
    }

    pub fn read_coils(&self, address: u16, count: u16) -> Result<Vec<bool>, StoreError> {
        read_span(&self.coils, address, count, MAX_READ_BITS)
    }

    pub fn read_discrete_inputs(&self, address: u16, count: u16) -> Result<Vec<bool>, StoreError> {
        read_span(&self.discrete_inputs, address, count, MAX_READ_BITS)
    }

    pub fn read_holding_registers(&self, address: u16, count: u16) -> Result<Vec<u16>, StoreError> {
        read_span(&self.holding_registers, address, count, MAX_READ_WORDS)
    }

    pub fn read_input_registers(&self, address: u16, count: u16) -> Result<Vec<u16>, StoreError> {
        read_span(&self.input_registers, address, count, MAX_READ_WORDS)
    }

    pub fn write_coils(&self, address: u16, values: &[bool]) -> Result<(), StoreError> {
        write_span(&self.coils, address, values, MAX_WRITE_BITS, self.read_only_coils)
    }

    pub fn write_holding_registers(&self, address: u16, values: &[u16]) -> Result<(), StoreError> {
        write_span(
            &self.holding_registers,
            address,
            values,
            MAX_WRITE_WORDS,
            self.read_only_holding_registers,
        )
    }

    // The `load_*` family is the host application's path for populating state
    // out of band (sensor values, defaults at boot). It bypasses the
    // protocol-side write protection and the per-PDU quantity limits; only
    // the space bounds apply.

    pub fn load_coils(&self, address: u16, values: &[bool]) -> Result<(), StoreError> {
        load_span(&self.coils, address, values)
    }

    pub fn load_discrete_inputs(&self, address: u16, values: &[bool]) -> Result<(), StoreError> {
        load_span(&self.discrete_inputs, address, values)
    }

    pub fn load_holding_registers(&self, address: u16, values: &[u16]) -> Result<(), StoreError> {
        load_span(&self.holding_registers, address, values)
    }

    pub fn load_input_registers(&self, address: u16, values: &[u16]) -> Result<(), StoreError> {
        load_span(&self.input_registers, address, values)
    }
}

fn check_bounds(address: u16, count: usize, size: usize) -> Result<(), StoreError> {
    let end = u32::from(address) + count as u32;
    if end as usize > size {
        return Err(StoreError::AddressOutOfRange { address, end, size });
    }
    Ok(())
}

fn read_span<T: Copy>(
    space: &RwLock<Vec<T>>,
    address: u16,
    count: u16,
    maximum: u16,
) -> Result<Vec<T>, StoreError> {
    if count == 0 || count > maximum {
        return Err(StoreError::QuantityOutOfRange { quantity: count.into(), maximum });
    }
    let space = space.read().unwrap_or_else(|e| e.into_inner());
    check_bounds(address, count.into(), space.len())?;
    let start = usize::from(address);
    Ok(space[start..start + usize::from(count)].to_vec())
}

fn write_span<T: Copy>(
    space: &RwLock<Vec<T>>,
    address: u16,
    values: &[T],
    maximum: u16,
    read_only: bool,
) -> Result<(), StoreError> {
    if values.is_empty() || values.len() > usize::from(maximum) {
        return Err(StoreError::QuantityOutOfRange { quantity: values.len(), maximum });
    }
    let mut space = space.write().unwrap_or_else(|e| e.into_inner());
    check_bounds(address, values.len(), space.len())?;
    if read_only {
        return Err(StoreError::ReadOnlySpace);
    }
    let start = usize::from(address);
    space[start..start + values.len()].copy_from_slice(values);
    Ok(())
}

fn load_span<T: Copy>(
    space: &RwLock<Vec<T>>,
    address: u16,
    values: &[T],
) -> Result<(), StoreError> {
    let mut space = space.write().unwrap_or_else(|e| e.into_inner());
    check_bounds(address, values.len(), space.len())?;
    let start = usize::from(address);
    space[start..start + values.len()].copy_from_slice(values);
    Ok(())
}
