use core::{borrow::Borrow, hash::Hash};
use hashbrown::{hash_map::DrainFilter, HashMap};
use num_traits::{CheckedAdd, CheckedSub, One, Zero};

/// Checked reference counts per key.
///
/// Entries stay in the map at count zero until [drained](`RefCounts::drain_unreferenced`),
/// so only keys that were referenced at some point are ever collected.
#[derive(Debug)]
pub struct RefCounts<K, C = u32>(HashMap<K, C>)
where
	K: Hash + Eq,
	C: CheckedAdd + CheckedSub + One + Zero;

impl<K, C> Default for RefCounts<K, C>
where
	K: Hash + Eq,
	C: CheckedAdd + CheckedSub + One + Zero,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<K, C> RefCounts<K, C>
where
	K: Hash + Eq,
	C: CheckedAdd + CheckedSub + One + Zero,
{
	#[must_use]
	pub fn new() -> Self {
		Self(HashMap::new())
	}

	pub fn retain(&mut self, key: K) -> Result<&C, CountError> {
		let count = self.0.entry(key).or_insert_with(C::zero);
		*count = count.checked_add(&C::one()).ok_or(CountError::Saturated)?;
		Ok(count)
	}

	pub fn release<Q: ?Sized>(&mut self, key: &Q) -> Result<&C, CountError>
	where
		K: Borrow<Q>,
		Q: Eq + Hash,
	{
		let count = self.0.get_mut(key).ok_or(CountError::Unknown)?;
		*count = count.checked_sub(&C::one()).ok_or(CountError::Underflow)?;
		Ok(count)
	}

	#[must_use]
	pub fn count<Q: ?Sized>(&self, key: &Q) -> Option<&C>
	where
		K: Borrow<Q>,
		Q: Eq + Hash,
	{
		self.0.get(key)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Removes and yields every key whose count is zero.
	pub fn drain_unreferenced(&mut self) -> DrainUnreferenced<'_, K, C> {
		DrainUnreferenced(self.0.drain_filter(DrainUnreferenced::<K, C>::unreferenced as fn(&K, &mut C) -> bool))
	}
}

pub struct DrainUnreferenced<'a, K, C>(DrainFilter<'a, K, C, fn(&K, &mut C) -> bool>);
impl<'a, K, C> DrainUnreferenced<'a, K, C>
where
	C: Zero,
{
	fn unreferenced(_: &K, count: &mut C) -> bool {
		count.is_zero()
	}
}
impl<'a, K, C> Iterator for DrainUnreferenced<'a, K, C> {
	type Item = K;

	fn next(&mut self) -> Option<Self::Item> {
		self.0.next().map(|(key, _)| key)
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		self.0.size_hint()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountError {
	Saturated,
	Underflow,
	Unknown,
}
