//! Part size and range planning for cross-backend transfers

use ferry_model::object::ByteRange;
use ferry_model::replication::DestinationFamily;

/// Part size used for small multipart uploads
const BASE_PART_SIZE: u64 = 16 * 1024 * 1024;
/// Part size is doubled up to this bound while the part count stays
/// above TARGET_PART_COUNT
const MAX_DOUBLING_PART_SIZE: u64 = 512 * 1024 * 1024;
const TARGET_PART_COUNT: u64 = 1024;
/// Hard bound of the multipart protocol, reached only by objects near
/// the 5 TiB object size limit
const MAX_PART_COUNT: u64 = 10_000;
/// GCP composes uploads out of at most 1024 components
const GCP_MAX_PART_COUNT: u64 = 1024;

fn ceil_div(a: u64, b: u64) -> u64 {
	(a + b - 1) / b
}

/// Part size for an object of the given length on the given family
pub fn part_size_for(content_length: u64, family: DestinationFamily) -> u64 {
	let mut part_size = BASE_PART_SIZE;
	while ceil_div(content_length, part_size) > TARGET_PART_COUNT
		&& part_size < MAX_DOUBLING_PART_SIZE
	{
		part_size *= 2;
	}
	while ceil_div(content_length, part_size) > MAX_PART_COUNT {
		part_size *= 2;
	}
	if family == DestinationFamily::Gcp && ceil_div(content_length, part_size) > GCP_MAX_PART_COUNT
	{
		part_size = ceil_div(content_length.next_power_of_two(), GCP_MAX_PART_COUNT);
	}
	part_size
}

/// Plan the inclusive byte ranges covering an object of the given
/// length. A zero-length object still produces one `None` range, so
/// that the destination sees a (zero-length) object.
pub fn plan(content_length: u64, family: DestinationFamily) -> Vec<Option<ByteRange>> {
	if content_length == 0 {
		return vec![None];
	}
	let part_size = part_size_for(content_length, family);
	let mut ranges = Vec::with_capacity(ceil_div(content_length, part_size) as usize);
	let mut start = 0;
	while start < content_length {
		let end = (start + part_size - 1).min(content_length - 1);
		ranges.push(Some(ByteRange::new(start, end)));
		start = end + 1;
	}
	ranges
}

#[cfg(test)]
mod tests {
	use super::*;

	const KIB: u64 = 1024;
	const MIB: u64 = 1024 * KIB;
	const GIB: u64 = 1024 * MIB;
	const TIB: u64 = 1024 * GIB;

	/// The ranges must exactly tile [0, length-1]
	fn check_tiling(content_length: u64, family: DestinationFamily) -> usize {
		let ranges = plan(content_length, family);
		assert!(!ranges.is_empty());
		if content_length == 0 {
			assert_eq!(ranges, vec![None]);
			return 1;
		}
		let mut expected_start = 0;
		for range in ranges.iter() {
			let range = range.unwrap();
			assert_eq!(range.start, expected_start);
			assert!(range.end >= range.start);
			expected_start = range.end + 1;
		}
		assert_eq!(expected_start, content_length);
		assert_eq!(
			ranges.iter().map(|r| r.unwrap().len()).sum::<u64>(),
			content_length
		);
		ranges.len()
	}

	#[test]
	fn test_plan_tiles_exactly() {
		for family in [DestinationFamily::Generic, DestinationFamily::Gcp] {
			for length in [
				0,
				1,
				KIB,
				16 * MIB - 1,
				16 * MIB,
				16 * MIB + 1,
				333 * MIB + 77,
				64 * GIB,
				64 * GIB + 5,
				5 * TIB,
			] {
				let count = check_tiling(length, family);
				assert!(count <= 10_000);
				if family == DestinationFamily::Gcp {
					assert!(count <= 1024, "{} parts for {} on gcp", count, length);
				}
			}
		}
	}

	#[test]
	fn test_small_object_single_part() {
		assert_eq!(plan(KIB, DestinationFamily::Generic).len(), 1);
		assert_eq!(plan(16 * MIB, DestinationFamily::Generic).len(), 1);
		assert_eq!(plan(16 * MIB + 1, DestinationFamily::Generic).len(), 2);
	}

	#[test]
	fn test_64_gib_object_uses_64_mib_parts() {
		assert_eq!(part_size_for(64 * GIB, DestinationFamily::Generic), 64 * MIB);
		let ranges = plan(64 * GIB, DestinationFamily::Generic);
		assert_eq!(ranges.len(), 1024);
		assert_eq!(ranges.last().unwrap().unwrap().end, 64 * GIB - 1);
	}

	#[test]
	fn test_gcp_cap_at_5_tib() {
		let part_size = part_size_for(5 * TIB, DestinationFamily::Gcp);
		assert_eq!(part_size, 8 * GIB);
		let ranges = plan(5 * TIB, DestinationFamily::Gcp);
		assert_eq!(ranges.len(), 640);
		assert_eq!(ranges.last().unwrap().unwrap().end, 5 * TIB - 1);
		// Part numbers are contiguous by construction: each range
		// starts where the previous one ended
		check_tiling(5 * TIB, DestinationFamily::Gcp);
	}

	#[test]
	fn test_5_tib_generic_stays_under_part_limit() {
		let part_size = part_size_for(5 * TIB, DestinationFamily::Generic);
		assert_eq!(part_size, GIB);
		assert_eq!(plan(5 * TIB, DestinationFamily::Generic).len(), 5120);
	}

	#[test]
	fn test_zero_length_object() {
		assert_eq!(plan(0, DestinationFamily::Generic), vec![None]);
		assert_eq!(plan(0, DestinationFamily::Azure), vec![None]);
	}
}
