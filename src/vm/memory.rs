use std::ops::Index;

use super::RuntimeError;
use crate::value::Value;

/// Flat cell array. Frames take contiguous windows off the top and give
/// them back in stack order.
#[derive(Debug, Clone)]
pub struct Memory {
    cells: Vec<Value>,
    top: usize,
}

impl Memory {
    pub fn new(capacity: usize) -> Self {
        Memory { cells: vec![Value::Nil; capacity], top: 0 }
    }

    /// Cells currently owned by live frames.
    pub fn in_use(&self) -> usize {
        self.top
    }

    /// Reserve `size` cells, all reset to `Nil`. Returns the window base.
    pub fn allocate(&mut self, size: usize) -> Result<usize, RuntimeError> {
        let base = self.top;
        let end = base
            .checked_add(size)
            .filter(|&end| end <= self.cells.len())
            .ok_or(RuntimeError::MemoryExhausted { requested: size, capacity: self.cells.len() })?;
        self.cells[base..end].fill(Value::Nil);
        self.top = end;
        Ok(base)
    }

    /// Give back every window from `base` upward.
    pub fn release(&mut self, base: usize) {
        self.top = self.top.min(base);
    }

    pub fn get(&self, addr: usize) -> Option<&Value> {
        self.cells.get(addr)
    }

    pub fn set(&mut self, addr: usize, value: Value) -> Result<(), RuntimeError> {
        let capacity = self.cells.len();
        let cell = self
            .cells
            .get_mut(addr)
            .ok_or(RuntimeError::AddressOutOfBounds { addr, size: capacity })?;
        *cell = value;
        Ok(())
    }
}

impl Index<usize> for Memory {
    type Output = Value;

    fn index(&self, addr: usize) -> &Value {
        &self.cells[addr]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_stack_and_reset() {
        let mut mem = Memory::new(8);
        let main = mem.allocate(3).unwrap();
        assert_eq!(main, 0);
        let callee = mem.allocate(2).unwrap();
        assert_eq!(callee, 3);
        mem.set(4, Value::Int(9)).unwrap();
        mem.release(callee);
        assert_eq!(mem.in_use(), 3);

        let again = mem.allocate(2).unwrap();
        assert_eq!(again, 3);
        assert_eq!(mem[4], Value::Nil);
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut mem = Memory::new(4);
        mem.allocate(3).unwrap();
        assert!(matches!(
            mem.allocate(2),
            Err(RuntimeError::MemoryExhausted { requested: 2, capacity: 4 })
        ));
        assert!(mem.allocate(usize::MAX).is_err());
    }

    #[test]
    fn out_of_range_write() {
        let mut mem = Memory::new(2);
        assert!(matches!(mem.set(2, Value::Bool(true)), Err(RuntimeError::AddressOutOfBounds { .. })));
        assert_eq!(mem.get(5), None);
    }
}
