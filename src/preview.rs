use core::fmt;

/// Bytes shown before a preview is cut short.
pub const PREVIEW_LEN: usize = 96;

/// A printable, bounded view of a wire payload for log lines.
pub struct Preview<'a>(&'a [u8]);

impl<'a> Preview<'a> {
    fn new<T>(data: &'a T) -> Preview<'a>
    where
        T: ?Sized + AsRef<[u8]> + 'a,
    {
        Preview(data.as_ref())
    }
}

impl fmt::Display for Preview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.0[..self.0.len().min(PREVIEW_LEN)];
        let text = String::from_utf8_lossy(shown);
        write!(f, "{:?}", text.trim_end_matches(['\r', '\n']))?;
        if self.0.len() > PREVIEW_LEN {
            write!(f, "…(+{} bytes)", self.0.len() - PREVIEW_LEN)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Preview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

pub trait PreviewExt {
    fn preview(&self) -> Preview<'_>;
}

impl<T> PreviewExt for T
where
    T: ?Sized + AsRef<[u8]>,
{
    fn preview(&self) -> Preview<'_> {
        Preview::new(self)
    }
}
