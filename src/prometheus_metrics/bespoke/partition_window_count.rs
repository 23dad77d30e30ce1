use const_format::formatcp;

use super::super::{LABEL_GROUP, LABEL_PARTITION, LABEL_TOPIC, NAMESPACE};
use super::{HEADER_HELP, HEADER_TYPE, TYPE_GAUGE};

const NAME: &str = formatcp!("{NAMESPACE}_partition_window_count");
const HELP: &str =
    formatcp!("{HEADER_HELP} {NAME} Records of the owned topic partition processed in the currently open window.");
const TYPE: &str = formatcp!("{HEADER_TYPE} {NAME} {TYPE_GAUGE}");

pub(crate) fn append_headers(res: &mut Vec<String>) {
    res.push(HELP.into());
    res.push(TYPE.into());
}

pub(crate) fn append_metric(group: &str, topic: &str, partition: u32, count: u64, res: &mut Vec<String>) {
    res.push(format!(
        "{NAME}\
        {{\
            {LABEL_GROUP}=\"{group}\",\
            {LABEL_TOPIC}=\"{topic}\",\
            {LABEL_PARTITION}=\"{partition}\"\
        }} \
        {count}"
    ));
}
