use std::fmt::{Display, Error, Formatter};

/// Writes the elements of the iterator to the formatter, separated by `sep`.
pub fn disp_iter<T: Display>(f: &mut Formatter<'_>, iterable: impl IntoIterator<Item = T>, sep: &str) -> Result<(), Error> {
    let mut i = iterable.into_iter();
    if let Some(first) = i.next() {
        write!(f, "{first}")?;
        for other in i {
            write!(f, "{sep}{other}")?;
        }
    }
    Result::Ok(())
}
