mod interval;

pub(crate) use self::interval::IntoPgInterval;
