// cuelink-common: wire types shared by the Cuelink relay and its clients

pub mod protocol;
