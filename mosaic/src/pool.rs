//! A pooled CPU-memory resource provider.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use nalgebra::Vector2;

use crate::error::ResourceExhausted;
use crate::storage::ResourceProvider;

const BYTES_PER_PIXEL: usize = 4;

/// A [`ResourceProvider`] backed by plain heap buffers.
///
/// Released buffers are kept around and handed out again for tiles of the
/// same size, avoiding repeated allocations while scrolling. An optional
/// cap bounds the total bytes handed out at any time.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Mutex<BufferPoolInner>>,
}

struct BufferPoolInner {
    /// Maximum number of idle buffers to retain, `None` for unlimited.
    max_idle: Option<usize>,

    /// Maximum number of live bytes handed out, `None` for unlimited.
    max_live: Option<usize>,

    /// Bytes currently handed out.
    live: usize,

    storage: Vec<Box<[u8]>>,
}

impl BufferPool {
    pub fn new(max_idle: Option<usize>, max_live: Option<usize>) -> Self {
        let inner = BufferPoolInner {
            max_idle,
            max_live,
            live: 0,
            storage: Vec::new(),
        };

        BufferPool {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Bytes currently handed out.
    pub fn live_bytes(&self) -> usize {
        self.inner.lock().unwrap().live
    }
}

impl ResourceProvider for BufferPool {
    type Handle = Buffer;

    fn acquire(&self, size: Vector2<i64>) -> Result<Buffer, ResourceExhausted> {
        let len = size.x as usize * size.y as usize * BYTES_PER_PIXEL;

        let mut pool = self.inner.lock().unwrap();

        if let Some(max) = pool.max_live {
            if pool.live + len > max {
                log::debug!("pool cap reached ({} live, {} requested)", pool.live, len);
                return Err(ResourceExhausted);
            }
        }

        let index = pool.storage.iter().position(|data| data.len() == len);
        let data = match index {
            Some(index) => {
                let mut data = pool.storage.swap_remove(index);

                log::trace!(
                    "allocating buffer {:?} from pool ({} remain)",
                    data.as_ptr(),
                    pool.storage.len()
                );

                data.fill(0);
                data
            }
            None => {
                let data = vec![0; len].into_boxed_slice();

                log::trace!("allocating buffer {:?} from global allocator", data.as_ptr());

                data
            }
        };

        pool.live += len;

        Ok(Buffer { size, data })
    }

    fn release(&self, buffer: Buffer) {
        let mut pool = self.inner.lock().unwrap();

        pool.live -= buffer.data.len();

        if pool.max_idle.is_none() || pool.storage.len() < pool.max_idle.unwrap() {
            log::trace!(
                "reclaiming buffer {:?} ({} available)",
                buffer.data.as_ptr(),
                pool.storage.len() + 1,
            );

            pool.storage.push(buffer.data);
        } else {
            log::trace!("dropping buffer {:?}", buffer.data.as_ptr());
            drop(buffer.data);
        }
    }
}

/// Pixel storage handed out by a [`BufferPool`].
pub struct Buffer {
    size: Vector2<i64>,
    data: Box<[u8]>,
}

impl Buffer {
    pub fn size(&self) -> Vector2<i64> {
        self.size
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for Buffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use nalgebra::vector;

    #[test]
    fn reuses_released_buffers() {
        let pool = BufferPool::new(None, None);

        let mut a = pool.acquire(vector![16, 16]).unwrap();
        a[0] = 0xff;
        let ptr = a.as_ptr();
        pool.release(a);

        // same size: the idle buffer comes back, zeroed
        let b = pool.acquire(vector![16, 16]).unwrap();
        assert_eq!(b.as_ptr(), ptr);
        assert_eq!(b[0], 0);

        // different size: a fresh allocation
        let c = pool.acquire(vector![8, 8]).unwrap();
        assert_eq!(c.len(), 8 * 8 * BYTES_PER_PIXEL);

        pool.release(b);
        pool.release(c);
        assert_eq!(pool.live_bytes(), 0);
    }

    #[test]
    fn live_cap_is_enforced() {
        let pool = BufferPool::new(None, Some(2 * 16 * 16 * BYTES_PER_PIXEL));

        let a = pool.acquire(vector![16, 16]).unwrap();
        let _b = pool.acquire(vector![16, 16]).unwrap();

        assert!(pool.acquire(vector![16, 16]).is_err());

        // releasing makes room again
        pool.release(a);
        assert!(pool.acquire(vector![16, 16]).is_ok());
    }

    #[test]
    fn idle_list_is_bounded() {
        let pool = BufferPool::new(Some(1), None);

        let a = pool.acquire(vector![4, 4]).unwrap();
        let b = pool.acquire(vector![4, 4]).unwrap();

        pool.release(a);
        pool.release(b);

        assert_eq!(pool.inner.lock().unwrap().storage.len(), 1);
    }
}
