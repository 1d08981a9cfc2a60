use std::io::{self, BufRead, Read, Write};

/// Stand-in for [`std::io::Stdin`].
pub trait Stdin {
    fn lock(&self) -> Box<dyn StdinLock + '_>;
}

/// Stand-in for [`std::io::StdinLock`].
pub trait StdinLock: Read + BufRead {}

impl StdinLock for io::StdinLock<'_> {}

impl Stdin for io::Stdin {
    fn lock(&self) -> Box<dyn StdinLock + '_> {
        Box::new(io::Stdin::lock(self))
    }
}

/// Stand-in for [`std::io::Stdout`] / [`std::io::Stderr`].
pub trait Writer: Write + Send + Sync {
    fn lock(&self) -> Box<dyn WriterLock + '_>;
}

/// Stand-in for [`std::io::StdoutLock`] / [`std::io::StderrLock`].
pub trait WriterLock: Write {}

impl WriterLock for io::StdoutLock<'_> {}

impl Writer for io::Stdout {
    fn lock(&self) -> Box<dyn WriterLock + '_> {
        Box::new(io::Stdout::lock(self))
    }
}

impl WriterLock for io::StderrLock<'_> {}

impl Writer for io::Stderr {
    fn lock(&self) -> Box<dyn WriterLock + '_> {
        Box::new(io::Stderr::lock(self))
    }
}

#[cfg(any(test, feature = "test-util"))]
pub(crate) use test_support::*;

#[cfg(any(test, feature = "test-util"))]
mod test_support {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex, MutexGuard};

    use super::*;

    struct TestStdinLock<'a> {
        inner: MutexGuard<'a, Cursor<String>>,
    }

    impl StdinLock for TestStdinLock<'_> {}

    impl Read for TestStdinLock<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl BufRead for TestStdinLock<'_> {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            self.inner.fill_buf()
        }
        fn consume(&mut self, n: usize) {
            self.inner.consume(n)
        }
    }

    pub(crate) type TestStdinInner = Arc<Mutex<Cursor<String>>>;

    pub(crate) struct TestStdin(pub(crate) TestStdinInner);

    impl Stdin for TestStdin {
        fn lock(&self) -> Box<dyn StdinLock + '_> {
            Box::new(TestStdinLock {
                inner: self.0.lock().unwrap_or_else(|e| e.into_inner()),
            })
        }
    }

    struct TestWriterLock<'a> {
        inner: MutexGuard<'a, Vec<u8>>,
    }

    impl WriterLock for TestWriterLock<'_> {}

    impl Write for TestWriterLock<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.inner.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    pub(crate) type TestWriterInner = Arc<Mutex<Vec<u8>>>;

    /// A thread-safe in-memory stand-in for stdout/stderr.
    #[derive(Clone, Default)]
    pub(crate) struct TestWriter(pub(crate) TestWriterInner);

    impl Writer for TestWriter {
        fn lock(&self) -> Box<dyn WriterLock + '_> {
            Box::new(TestWriterLock {
                inner: self.0.lock().unwrap_or_else(|e| e.into_inner()),
            })
        }
    }

    impl Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
