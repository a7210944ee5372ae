#![macro_use]

/// bump an atomic counter without spelling the ordering out at every call
/// site; increments by 1, or by the amount given as a second argument
#[macro_export]
macro_rules! atomic_increment {
    ($counter:expr) => {
        $counter.fetch_add(1, Ordering::Relaxed);
    };

    ($counter:expr, $amount:expr) => {
        $counter.fetch_add($amount, Ordering::Relaxed);
    };
}

/// read an atomic counter, relaxed by default; a second argument overrides
/// the ordering
#[macro_export]
macro_rules! atomic_load {
    ($counter:expr) => {
        $counter.load(Ordering::Relaxed)
    };
    ($counter:expr, $ordering:expr) => {
        $counter.load($ordering)
    };
}
