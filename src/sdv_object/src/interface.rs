//! Capability identification and type-erased interface references.
//!
//! Every capability set a service object can expose is an object-safe trait
//! registered with [`declare_interface!`]. The registration attaches a stable
//! 64-bit id derived from the fully qualified interface name; that id is the
//! only typing primitive crossing module boundaries. An [`InterfaceRef`]
//! carries `(id, pointer)` and hands the typed trait object back through
//! [`InterfaceRef::get`] if and only if the requested id matches.

use std::cmp::Ordering;
use std::marker::PhantomData;

/// Stable 64-bit capability id. Id 0 is reserved for the null reference.
pub type InterfaceId = u64;

/// Compute an interface id from a fully qualified interface name.
///
/// FNV-1a over the UTF-8 bytes of the name. Evaluated at compile time by
/// [`declare_interface!`]; id collisions within one process violate a system
/// invariant and are covered by the id uniqueness tests.
pub const fn interface_id_from_name(name: &str) -> InterfaceId {
    let bytes = name.as_bytes();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut idx = 0;
    while idx < bytes.len() {
        hash ^= bytes[idx] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        idx += 1;
    }
    // 0 marks the null reference and must never identify a real interface.
    if hash == 0 {
        1
    } else {
        hash
    }
}

/// Identification attached to a `dyn Trait` capability type.
pub trait InterfaceIdent {
    /// The interface id.
    const IID: InterfaceId;
    /// The fully qualified interface name the id was derived from.
    const IFC_NAME: &'static str;
}

/// Get the id of an interface type.
pub fn iid<I: ?Sized + InterfaceIdent>() -> InterfaceId {
    I::IID
}

/// Register a capability trait with its fully qualified name.
///
/// ```ignore
/// pub trait VehicleSpeed { fn speed(&self) -> f64; }
/// declare_interface!(VehicleSpeed, "sdv.example.VehicleSpeed");
/// ```
#[macro_export]
macro_rules! declare_interface {
    ($ifc:path, $name:literal) => {
        impl $crate::interface::InterfaceIdent for dyn $ifc {
            const IID: $crate::interface::InterfaceId =
                $crate::interface::interface_id_from_name($name);
            const IFC_NAME: &'static str = $name;
        }
    };
}

/// Type-erased trait-object pointer. Data and metadata halves of a fat
/// pointer, kept apart so the data half is available for identity compares.
#[derive(Clone, Copy)]
struct RawIfc {
    data: *const (),
    meta: *const (),
}

impl RawIfc {
    const fn null() -> Self {
        RawIfc {
            data: std::ptr::null(),
            meta: std::ptr::null(),
        }
    }
}

/// Erase a trait-object pointer into its raw halves.
///
/// SAFETY: `I` must be a `dyn Trait` type, for which a pointer is exactly two
/// pointer-sized words. The compile-time size assertion rejects anything else.
unsafe fn erase<I: ?Sized>(ptr: *const I) -> RawIfc {
    debug_assert_eq!(
        std::mem::size_of::<*const I>(),
        std::mem::size_of::<RawIfc>()
    );
    std::mem::transmute_copy(&ptr)
}

/// Rebuild a trait-object pointer from its raw halves.
///
/// SAFETY: `raw` must have been produced by [`erase`] with the same `I`. The
/// caller guarantees this through the interface-id check: references are only
/// constructed by [`InterfaceRef::new`], which stores `I::IID` alongside.
unsafe fn unerase<I: ?Sized>(raw: RawIfc) -> *const I {
    debug_assert_eq!(
        std::mem::size_of::<*const I>(),
        std::mem::size_of::<RawIfc>()
    );
    std::mem::transmute_copy(&raw)
}

/// A `(capability id, pointer)` pair referencing one capability of a live
/// object.
///
/// The reference borrows the providing object: the borrow checker enforces
/// the rule that a non-null reference may only be dereferenced while the
/// originating object is alive. Equality and ordering are defined on
/// `(id, data pointer)`; the null reference has id 0.
#[derive(Clone, Copy)]
pub struct InterfaceRef<'a> {
    id: InterfaceId,
    raw: RawIfc,
    _life: PhantomData<&'a ()>,
}

impl<'a> InterfaceRef<'a> {
    /// The null reference.
    pub const fn null() -> Self {
        InterfaceRef {
            id: 0,
            raw: RawIfc::null(),
            _life: PhantomData,
        }
    }

    /// Wrap a typed capability reference.
    pub fn new<I: ?Sized + InterfaceIdent>(ifc: &'a I) -> Self {
        InterfaceRef {
            id: I::IID,
            // SAFETY: `I` is a registered `dyn Trait` type (only those carry
            // `InterfaceIdent`), so the pointer is a two-word fat pointer.
            raw: unsafe { erase::<I>(ifc as *const I) },
            _life: PhantomData,
        }
    }

    /// The id of the stored capability, 0 when null.
    pub fn id(&self) -> InterfaceId {
        self.id
    }

    pub fn is_null(&self) -> bool {
        self.id == 0
    }

    /// Clear the reference back to null.
    pub fn reset(&mut self) {
        *self = InterfaceRef::null();
    }

    /// Get the typed capability if the stored id matches `I`, null-equivalent
    /// `None` otherwise.
    pub fn get<I: ?Sized + InterfaceIdent>(&self) -> Option<&'a I> {
        if self.id != 0 && self.id == I::IID {
            // SAFETY: the reference was created by `new::<J>` with
            // `J::IID == self.id`. Interface ids are unique within the
            // process, so `J` and `I` are the same type.
            Some(unsafe { &*unerase::<I>(self.raw) })
        } else {
            None
        }
    }
}

impl PartialEq for InterfaceRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && std::ptr::eq(self.raw.data, other.raw.data)
    }
}

impl Eq for InterfaceRef<'_> {}

impl PartialOrd for InterfaceRef<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InterfaceRef<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.id, self.raw.data as usize).cmp(&(other.id, other.raw.data as usize))
    }
}

impl std::fmt::Debug for InterfaceRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceRef")
            .field("id", &self.id)
            .field("data", &self.raw.data)
            .finish()
    }
}

impl Default for InterfaceRef<'_> {
    fn default() -> Self {
        InterfaceRef::null()
    }
}

/// Capability query entry point implemented by every object and by every
/// collection that forwards queries to members.
pub trait InterfaceAccess {
    /// Resolve a capability by id. Absent capabilities yield `None`, never an
    /// error. A class that wants to answer for a capability it does not
    /// implement itself has to delegate explicitly through its interface map.
    fn get_interface(&self, id: InterfaceId) -> Option<InterfaceRef<'_>>;
}

/// Typed convenience wrapper around [`InterfaceAccess::get_interface`].
pub fn query<'a, I, S>(src: &'a S) -> Option<&'a I>
where
    I: ?Sized + InterfaceIdent,
    S: InterfaceAccess + ?Sized,
{
    src.get_interface(I::IID).and_then(|r| r.get::<I>())
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Odometer {
        fn total(&self) -> u64;
    }
    trait TripCounter {
        fn trip(&self) -> u64;
    }
    crate::declare_interface!(Odometer, "sdv.test.Odometer");
    crate::declare_interface!(TripCounter, "sdv.test.TripCounter");

    struct Cluster {
        total: u64,
        trip: u64,
    }
    impl Odometer for Cluster {
        fn total(&self) -> u64 {
            self.total
        }
    }
    impl TripCounter for Cluster {
        fn trip(&self) -> u64 {
            self.trip
        }
    }

    #[test]
    fn id_is_stable_and_nonzero() {
        assert_eq!(
            interface_id_from_name("sdv.test.Odometer"),
            interface_id_from_name("sdv.test.Odometer")
        );
        assert_ne!(interface_id_from_name("sdv.test.Odometer"), 0);
        assert_ne!(
            interface_id_from_name("sdv.test.Odometer"),
            interface_id_from_name("sdv.test.TripCounter")
        );
    }

    #[test]
    fn typed_get_checks_the_id() {
        let cluster = Cluster {
            total: 120_450,
            trip: 88,
        };
        let r = InterfaceRef::new::<dyn Odometer>(&cluster);
        assert!(!r.is_null());
        assert_eq!(r.id(), iid::<dyn Odometer>());
        assert_eq!(r.get::<dyn Odometer>().unwrap().total(), 120_450);
        assert!(r.get::<dyn TripCounter>().is_none());
    }

    #[test]
    fn null_reference_yields_nothing() {
        let mut r = InterfaceRef::null();
        assert!(r.is_null());
        assert_eq!(r.id(), 0);
        assert!(r.get::<dyn Odometer>().is_none());
        r.reset();
        assert!(r.is_null());
    }

    #[test]
    fn equality_is_id_and_pointer() {
        let cluster = Cluster { total: 1, trip: 2 };
        let a = InterfaceRef::new::<dyn Odometer>(&cluster);
        let b = InterfaceRef::new::<dyn Odometer>(&cluster);
        let c = InterfaceRef::new::<dyn TripCounter>(&cluster);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, InterfaceRef::null());
        assert_eq!(InterfaceRef::null(), InterfaceRef::null());
    }
}
