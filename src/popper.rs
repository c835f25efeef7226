//! The scoped-acquisition `Popper` pattern (§3, §9's `GivesPopper` /
//! `NeedsPopper` / `Popper` triple).
//!
//! The source models streaming request bodies as a function that is
//! *given* a consumer callback, acquires whatever resource backs the
//! stream, hands the consumer a `popper` (pull the next chunk, empty =
//! EOF), and guarantees release on every exit path — including the
//! consumer panicking/raising. In Rust the natural realization is a
//! method that takes a closure and relies on `Drop`/unwind-safety to
//! release resources, rather than a trait object the caller must
//! remember to close.

use error::HttpExceptionContent;

/// Pull-based function returning the next request-body chunk; empty =
/// EOF. Boxed so a `PopperFactory` can hand out one without naming its
/// concrete closure type.
pub type Popper<'a> = Box<dyn FnMut() -> Result<Vec<u8>, HttpExceptionContent> + 'a>;

/// A scoped producer of request-body chunks.
///
/// `with_popper` must acquire whatever resource backs the stream (an open
/// file, a channel receiver, ...), invoke `consumer` with a popper drawn
/// from it, and release the resource when `consumer` returns *or
/// unwinds* — in Rust this falls out for free as long as the resource is
/// a local variable dropped at the end of the function body, which is
/// exactly how every implementation below is written.
///
/// Implementations MUST tolerate being called more than once: the same
/// `PopperFactory` may be asked to produce a popper again if the request
/// is retried or redirected.
pub trait PopperFactory: Send + Sync {
    fn with_popper(
        &self,
        consumer: &mut dyn FnMut(Popper) -> Result<(), HttpExceptionContent>,
    ) -> Result<(), HttpExceptionContent>;
}

/// Wrap an iterator of chunks as a `PopperFactory`. The iterator is
/// re-created from `make` every call, satisfying the multiple-invocation
/// requirement above.
pub struct FromFn<F> {
    make: F,
}

impl<F> FromFn<F>
where
    F: Fn() -> Box<dyn Iterator<Item = Vec<u8>> + Send> + Send + Sync,
{
    pub fn new(make: F) -> FromFn<F> {
        FromFn { make }
    }
}

impl<F> PopperFactory for FromFn<F>
where
    F: Fn() -> Box<dyn Iterator<Item = Vec<u8>> + Send> + Send + Sync,
{
    fn with_popper(
        &self,
        consumer: &mut dyn FnMut(Popper) -> Result<(), HttpExceptionContent>,
    ) -> Result<(), HttpExceptionContent> {
        let mut iter = (self.make)();
        let popper: Popper = Box::new(move || Ok(iter.next().unwrap_or_default()));
        consumer(popper)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn popper_factory_can_be_invoked_twice() {
        let factory = FromFn::new(|| {
            Box::new(vec![b"a".to_vec(), b"b".to_vec()].into_iter())
                as Box<dyn Iterator<Item = Vec<u8>> + Send>
        });
        for _ in 0..2 {
            let mut chunks = Vec::new();
            factory
                .with_popper(&mut |mut pop| {
                    loop {
                        let chunk = pop()?;
                        if chunk.is_empty() {
                            break;
                        }
                        chunks.push(chunk);
                    }
                    Ok(())
                })
                .unwrap();
            assert_eq!(chunks, vec![b"a".to_vec(), b"b".to_vec()]);
        }
    }
}
