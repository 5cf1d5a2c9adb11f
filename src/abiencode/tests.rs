use core::fmt::Debug;

/*
Python code to split output from remix into chunks of 32 bytes, the annotations
are done manually.
```python
s = "..."
print(*(s[i:i+64] for i in range(0, len(s), 64)), sep="\n")
```
*/

struct Slot<'a>(&'a [u8]);

impl<'a> Debug for Slot<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in self.0 {
            f.write_fmt(format_args!("{:02x}", b))?;
        }
        Ok(())
    }
}

impl<'a> PartialEq for Slot<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Compare `actual` slot by slot against `expected`.
///
/// Each non-empty line of `expected` must start with a 32 byte hex string,
/// anything after it is a free-form annotation (`//` is not required).
pub fn compare_slots(actual: &[u8], expected: &str) {
    assert_eq!(actual.len() % 32, 0, "encoding must consist of whole slots");

    let expected: Vec<(&str, &str)> = expected
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.len() < 64 {
                panic!("expected line is too short, it must start with a 32 byte hex string!");
            }
            (&trimmed[..64], line)
        })
        .collect();

    let mut slots = actual.chunks(32);
    for (expected, line) in expected {
        // Print current expected line to make debugging easier.
        println!("{}", line);

        let slot = match slots.next() {
            Some(slot) => slot,
            None => panic!("there are less slots than expected."),
        };
        let expected = hex::decode(expected).unwrap();

        // We're wrapping both in Slot to make assert_eq! format both as a hex
        // string.
        assert_eq!(
            Slot(slot),
            Slot(expected.as_slice()),
            "slot did not match the expected value"
        );
    }

    if let Some(slot) = slots.next() {
        panic!("Expected end of data, got {:?}", Slot(slot));
    }
}
