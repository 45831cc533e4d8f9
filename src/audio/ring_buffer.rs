//! Ring buffer d'octets à écrasement
//!
//! Quand le buffer est plein, l'écriture écrase les octets les plus anciens :
//! le producteur n'est jamais bloqué et le consommateur lit toujours les
//! données les plus récentes, dans l'ordre.

/// Buffer circulaire d'octets à capacité fixe
#[derive(Debug, Default)]
pub struct RingBuffer {
    data: Vec<u8>,
    /// Index d'écriture
    head: usize,
    /// Index de lecture
    tail: usize,
    /// Nombre d'octets non lus (≤ capacité)
    used: usize,
}

impl RingBuffer {
    /// Crée un buffer de `capacity` octets
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buffer = Self::default();
        buffer.set_capacity(capacity);
        buffer
    }

    /// (Ré)alloue le buffer et remet les curseurs à zéro
    pub fn set_capacity(&mut self, capacity: usize) {
        self.data = vec![0; capacity];
        self.head = 0;
        self.tail = 0;
        self.used = 0;
    }

    /// Ajoute `bytes` en écrasant les octets les plus anciens si nécessaire
    ///
    /// Une écriture plus grande que la capacité ne conserve que ses
    /// `capacity` derniers octets.
    pub fn write(&mut self, bytes: &[u8]) {
        let capacity = self.capacity();
        if capacity == 0 || bytes.is_empty() {
            return;
        }

        let bytes = if bytes.len() > capacity {
            &bytes[bytes.len() - capacity..]
        } else {
            bytes
        };
        let size = bytes.len();

        if self.used + size > capacity {
            let overflow = self.used + size - capacity;
            self.tail = (self.tail + overflow) % capacity;
            self.used = capacity;
        } else {
            self.used += size;
        }

        let first_chunk = (capacity - self.head).min(size);
        self.data[self.head..self.head + first_chunk].copy_from_slice(&bytes[..first_chunk]);
        self.data[..size - first_chunk].copy_from_slice(&bytes[first_chunk..]);
        self.head = (self.head + size) % capacity;
    }

    /// Lit au plus `dest.len()` octets et retourne le nombre d'octets copiés
    pub fn read(&mut self, dest: &mut [u8]) -> usize {
        let to_read = dest.len().min(self.used);
        if to_read == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let first_chunk = (capacity - self.tail).min(to_read);
        dest[..first_chunk].copy_from_slice(&self.data[self.tail..self.tail + first_chunk]);
        dest[first_chunk..to_read].copy_from_slice(&self.data[..to_read - first_chunk]);

        self.tail = (self.tail + to_read) % capacity;
        self.used -= to_read;

        to_read
    }

    /// Capacité en octets
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Nombre d'octets en attente de lecture
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(buffer: &mut RingBuffer) -> Vec<u8> {
        let mut out = vec![0; buffer.capacity()];
        let n = buffer.read(&mut out);
        out.truncate(n);
        out
    }

    #[test]
    fn write_then_read_in_order() {
        let mut buffer = RingBuffer::with_capacity(8);
        buffer.write(&[1, 2, 3]);
        buffer.write(&[4, 5]);

        assert_eq!(buffer.used(), 5);
        assert_eq!(read_all(&mut buffer), vec![1, 2, 3, 4, 5]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn read_more_than_used_returns_used() {
        let mut buffer = RingBuffer::with_capacity(8);
        buffer.write(&[7, 8, 9]);

        let mut out = [0u8; 6];
        assert_eq!(buffer.read(&mut out), 3);
        assert_eq!(&out[..3], &[7, 8, 9]);
        assert_eq!(buffer.read(&mut out), 0);
    }

    #[test]
    fn read_on_empty_buffer_is_zero() {
        let mut buffer = RingBuffer::with_capacity(4);
        let mut out = [0u8; 4];
        assert_eq!(buffer.read(&mut out), 0);

        let mut unallocated = RingBuffer::default();
        assert_eq!(unallocated.read(&mut out), 0);
    }

    #[test]
    fn overflow_discards_oldest_bytes() {
        let mut buffer = RingBuffer::with_capacity(4);
        buffer.write(&[1, 2, 3]);
        buffer.write(&[4, 5, 6]);

        assert_eq!(buffer.used(), 4);
        assert_eq!(read_all(&mut buffer), vec![3, 4, 5, 6]);
    }

    #[test]
    fn oversized_write_keeps_last_capacity_bytes() {
        let mut buffer = RingBuffer::with_capacity(4);
        buffer.write(&[9, 9]);
        buffer.write(&[1, 2, 3, 4, 5, 6, 7]);

        assert_eq!(buffer.used(), 4);
        assert_eq!(read_all(&mut buffer), vec![4, 5, 6, 7]);
    }

    #[test]
    fn write_splits_across_wrap_boundary() {
        let mut buffer = RingBuffer::with_capacity(16);
        buffer.write(&[0; 12]);
        assert_eq!(read_all(&mut buffer).len(), 12);

        let pattern: Vec<u8> = (100..110).collect();
        buffer.write(&pattern);

        assert_eq!(buffer.used(), 10);
        assert_eq!(read_all(&mut buffer), pattern);
    }

    #[test]
    fn set_capacity_resets_cursors() {
        let mut buffer = RingBuffer::with_capacity(4);
        buffer.write(&[1, 2, 3]);
        buffer.set_capacity(8);

        assert_eq!(buffer.capacity(), 8);
        assert!(buffer.is_empty());
    }

    #[test]
    fn used_never_exceeds_capacity() {
        let mut buffer = RingBuffer::with_capacity(13);
        let mut expected: std::collections::VecDeque<u8> = Default::default();
        let mut seed: u32 = 0x1234_5678;
        let mut next = 0u8;

        for _ in 0..500 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let len = (seed >> 16) as usize % 9;

            if seed & 1 == 0 {
                let chunk: Vec<u8> = (0..len)
                    .map(|_| {
                        next = next.wrapping_add(1);
                        next
                    })
                    .collect();
                buffer.write(&chunk);
                expected.extend(chunk);
                while expected.len() > 13 {
                    expected.pop_front();
                }
            } else {
                let mut out = vec![0; len];
                let n = buffer.read(&mut out);
                assert_eq!(n, len.min(expected.len()));
                let want: Vec<u8> = expected.drain(..n).collect();
                assert_eq!(&out[..n], &want[..]);
            }

            assert!(buffer.used() <= buffer.capacity());
            assert_eq!(buffer.used(), expected.len());
        }
    }
}
