use crate::{error::Result, Tuple};

/// The pull-based tuple stream every access method and relational operator exposes.
///
/// `has_next` and `next` fail with [`crate::DbError::IllegalState`] unless the iterator is open.
pub trait DbIterator {
    /// Prepare the iterator; positions it before the first tuple
    fn open(&mut self) -> Result<()>;

    fn has_next(&mut self) -> Result<bool>;

    /// Return the next tuple, failing if there is none
    fn next(&mut self) -> Result<Tuple>;

    /// Release everything the iterator holds. Closing twice is a no-op.
    fn close(&mut self);

    /// Restart from the first tuple
    fn rewind(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    /// Drain every remaining tuple
    fn collect_remaining(&mut self) -> Result<Vec<Tuple>> {
        let mut tuples = Vec::new();
        while self.has_next()? {
            tuples.push(self.next()?);
        }
        Ok(tuples)
    }
}
