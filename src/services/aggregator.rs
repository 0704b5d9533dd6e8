//! Groups stream records into channels by directory id (tvg-id)

use std::collections::HashMap;

use crate::models::{Channel, ChannelFilter, StreamRecord};

/// Group records into channels.
///
/// Records must arrive in source-then-in-source order; the first record of a
/// group supplies the channel fields. Records with a blank directory id each
/// become their own channel.
pub fn aggregate<I>(records: I) -> Vec<Channel>
where
    I: IntoIterator<Item = StreamRecord>,
{
    let mut channels: Vec<Channel> = Vec::new();
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for record in records {
        let Some(key) = record.grouping_key().map(str::to_string) else {
            channels.push(Channel::from_first(record));
            continue;
        };

        match index_by_key.get(&key) {
            Some(&idx) => channels[idx].streams.push(record),
            None => {
                index_by_key.insert(key, channels.len());
                channels.push(Channel::from_first(record));
            }
        }
    }

    channels
}

/// Keep channels matching the filter, preserving order
pub fn filter_channels(channels: Vec<Channel>, filter: &ChannelFilter) -> Vec<Channel> {
    if filter.is_empty() {
        return channels;
    }
    channels.into_iter().filter(|c| filter.matches(c)).collect()
}
